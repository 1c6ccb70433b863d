//! Resume navigator: which story should a returning user land on.

use crate::client::StorySummary;
use crate::types::StoryId;

/// Index of the story to highlight (and open by default) in an ordered
/// story list, given the resume pointer.
///
/// The target is the entry after the last-read story; if that is out of
/// bounds or locked, the target collapses back to the last-read story
/// itself. With no resume pointer (or one that is no longer in the list)
/// the first story is highlighted.
///
/// Pure given its inputs; no hidden state.
#[must_use]
pub fn compute_highlight_index(stories: &[StorySummary], last_read: Option<&StoryId>) -> usize {
    let last_index = match last_read.and_then(|id| stories.iter().position(|s| &s.id == id)) {
        Some(i) => i,
        None => return 0,
    };

    let candidate = last_index + 1;
    if candidate >= stories.len() || stories[candidate].locked {
        return last_index;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, bool)]) -> Vec<StorySummary> {
        entries
            .iter()
            .map(|(id, locked)| {
                let s = StorySummary::new(StoryId::new(*id), format!("Story {id}"));
                if *locked {
                    s.locked()
                } else {
                    s
                }
            })
            .collect()
    }

    fn unlocked(ids: &[&str]) -> Vec<StorySummary> {
        list(&ids.iter().map(|id| (*id, false)).collect::<Vec<_>>())
    }

    #[test]
    fn highlights_the_story_after_the_last_read_one() {
        let stories = unlocked(&["a", "b", "c", "d"]);
        assert_eq!(
            compute_highlight_index(&stories, Some(&StoryId::new("b"))),
            2
        );
    }

    #[test]
    fn last_item_read_collapses_to_itself() {
        let stories = unlocked(&["a", "b", "c", "d"]);
        assert_eq!(
            compute_highlight_index(&stories, Some(&StoryId::new("d"))),
            3
        );
    }

    #[test]
    fn nothing_read_yet_highlights_the_first_story() {
        let stories = unlocked(&["a", "b", "c", "d"]);
        assert_eq!(compute_highlight_index(&stories, None), 0);
    }

    #[test]
    fn unknown_resume_pointer_falls_back_to_the_first_story() {
        let stories = unlocked(&["a", "b"]);
        assert_eq!(
            compute_highlight_index(&stories, Some(&StoryId::new("zzz"))),
            0
        );
    }

    #[test]
    fn locked_next_story_keeps_the_last_read_highlighted() {
        let stories = list(&[("a", false), ("b", false), ("c", true), ("d", false)]);
        assert_eq!(
            compute_highlight_index(&stories, Some(&StoryId::new("b"))),
            1
        );
    }

    #[test]
    fn empty_list_highlights_index_zero() {
        assert_eq!(compute_highlight_index(&[], None), 0);
        assert_eq!(compute_highlight_index(&[], Some(&StoryId::new("a"))), 0);
    }
}
