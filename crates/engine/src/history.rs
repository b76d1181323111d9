//! Finished tracks, most recent last.

use jukebox_core::Track;
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct History {
    tracks: VecDeque<Track>,
    /// `0` means unbounded.
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            limit,
        }
    }

    /// Appends, discarding the oldest entry once the limit is reached.
    pub fn push(&mut self, track: Track) {
        if self.limit > 0 && self.tracks.len() >= self.limit {
            self.tracks.pop_front();
        }
        self.tracks.push_back(track);
    }

    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_back()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        if limit > 0 {
            while self.tracks.len() > limit {
                self.tracks.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::History;
    use jukebox_core::{Requester, Track};

    fn track(id: &str) -> Track {
        Track::new(
            id,
            id,
            60,
            format!("https://example.com/{id}"),
            format!("/cache/{id}.mp3"),
            Requester("tester".to_string()),
        )
        .unwrap()
    }

    fn ids(history: &History) -> Vec<&str> {
        history.iter().map(Track::id).collect()
    }

    #[test]
    fn pops_most_recent_first() {
        let mut history = History::new(10);
        history.push(track("a"));
        history.push(track("b"));

        assert_eq!(history.pop().unwrap().id(), "b");
        assert_eq!(history.pop().unwrap().id(), "a");
        assert!(history.pop().is_none());
    }

    #[test]
    fn drops_oldest_past_limit() {
        let mut history = History::new(2);
        for id in ["a", "b", "c"] {
            history.push(track(id));
        }
        assert_eq!(ids(&history), vec!["b", "c"]);

        history.set_limit(1);
        assert_eq!(ids(&history), vec!["c"]);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let mut history = History::new(0);
        for i in 0..100 {
            history.push(track(&format!("t{i}")));
        }
        assert_eq!(history.len(), 100);
    }
}
