use std::sync::{Mutex, PoisonError};

/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;

/// Read side of whatever owns the scroll viewport.
///
/// Offsets grow downward from 0 at the top; `max_offset` is the largest offset
/// the content allows, 0 when nothing overflows.
pub trait ScrollPosition: Send + Sync {
    fn offset(&self) -> f32;
    fn max_offset(&self) -> f32;

    fn is_within_bottom(&self, threshold: f32) -> bool {
        let max_offset = self.max_offset();
        if max_offset <= 0.0 {
            return true;
        }
        (max_offset - self.offset()).abs() <= threshold.max(0.0)
    }
}

/// Tracks follow-bottom behavior independent from message content.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    resume_threshold: f32,
    pending_scroll_to_bottom: bool,
    follow_bottom: bool,
    offset: f32,
    max_offset: f32,
}

impl ScrollTracker {
    pub fn new(resume_threshold: f32) -> Self {
        Self {
            resume_threshold: resume_threshold.max(0.0),
            pending_scroll_to_bottom: false,
            follow_bottom: true,
            offset: 0.0,
            max_offset: 0.0,
        }
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
        self.follow_bottom = true;
    }

    pub fn request_scroll_to_bottom_if_following(&mut self) {
        if self.follow_bottom || self.is_within_bottom(self.resume_threshold) {
            self.pending_scroll_to_bottom = true;
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.max_offset = 0.0;
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    /// Records a new viewport reading and updates follow mode from it.
    pub fn observe(&mut self, offset: f32, max_offset: f32) {
        let was_near_bottom = self.is_within_bottom(self.resume_threshold);
        let offset_delta = offset - self.offset;
        let content_size_changed = (max_offset - self.max_offset).abs() > SCROLL_DELTA_EPSILON;
        let user_scrolled_up = offset_delta < -SCROLL_DELTA_EPSILON && !content_size_changed;
        let user_scrolled_down = offset_delta > SCROLL_DELTA_EPSILON && !content_size_changed;

        self.offset = offset;
        self.max_offset = max_offset;

        if self.pending_scroll_to_bottom || (content_size_changed && was_near_bottom) {
            self.follow_bottom = true;
        } else if self.follow_bottom {
            if user_scrolled_up {
                self.follow_bottom = false;
            }
        } else if user_scrolled_down && self.is_within_bottom(self.resume_threshold) {
            self.follow_bottom = true;
        }
    }

    /// Returns the offset the viewport should move to, if any, and clears
    /// the pending request.
    pub fn apply_pending_scroll(&mut self) -> Option<f32> {
        let should_scroll = self.follow_bottom || self.pending_scroll_to_bottom;
        self.pending_scroll_to_bottom = false;
        if !should_scroll {
            return None;
        }

        let target = self.max_offset.max(0.0);
        self.offset = target;
        Some(target)
    }
}

impl ScrollPosition for ScrollTracker {
    fn offset(&self) -> f32 {
        self.offset
    }

    fn max_offset(&self) -> f32 {
        self.max_offset
    }
}

impl ScrollPosition for Mutex<ScrollTracker> {
    fn offset(&self) -> f32 {
        self.lock().unwrap_or_else(PoisonError::into_inner).offset
    }

    fn max_offset(&self) -> f32 {
        self.lock().unwrap_or_else(PoisonError::into_inner).max_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_short_content_counts_as_bottom() {
        let tracker = ScrollTracker::new(24.0);
        assert!(tracker.is_within_bottom(0.0));
    }

    #[test]
    fn user_scrolling_up_pauses_follow_mode() {
        let mut tracker = ScrollTracker::new(24.0);
        tracker.observe(500.0, 500.0);
        assert!(tracker.is_following_bottom());

        tracker.observe(200.0, 500.0);
        assert!(!tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(), None);
        assert!(!tracker.is_within_bottom(24.0));
    }

    #[test]
    fn scrolling_back_near_bottom_resumes_follow_mode() {
        let mut tracker = ScrollTracker::new(24.0);
        tracker.observe(500.0, 500.0);
        tracker.observe(200.0, 500.0);
        tracker.observe(490.0, 500.0);

        assert!(tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(), Some(500.0));
    }

    #[test]
    fn content_growth_while_at_bottom_keeps_following() {
        let mut tracker = ScrollTracker::new(24.0);
        tracker.observe(500.0, 500.0);
        tracker.observe(500.0, 800.0);

        assert!(tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(), Some(800.0));
        assert!(tracker.is_within_bottom(0.0));
    }

    #[test]
    fn explicit_request_overrides_paused_follow() {
        let mut tracker = ScrollTracker::new(24.0);
        tracker.observe(500.0, 500.0);
        tracker.observe(100.0, 500.0);
        tracker.request_scroll_to_bottom();

        assert_eq!(tracker.apply_pending_scroll(), Some(500.0));
        assert!(tracker.is_following_bottom());
    }
}
