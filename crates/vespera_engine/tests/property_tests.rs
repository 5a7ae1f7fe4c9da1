//! Property-based tests for the pure engine components.

use proptest::prelude::*;
use vespera_core::{ChatMessage, MoodRule, NEUTRAL_MOOD};
use vespera_engine::{has_priority_keyword, passes_filter, resolve_mood, ChatLog};

proptest! {
    #[test]
    fn filter_rejects_any_text_containing_a_banned_word(
        prefix in "[a-z ]{0,20}",
        word in "[a-z]{3,8}",
        suffix in "[a-z ]{0,20}",
    ) {
        let banned = vec![word.clone()];
        let text = format!("{prefix}{word}{suffix}");
        prop_assert!(!passes_filter(&banned, &text));
    }

    #[test]
    fn filter_passes_text_without_the_banned_substring(text in "[a-p ]{0,40}") {
        // "q" cannot appear in the generated text
        let banned = vec!["qqqq".to_string()];
        prop_assert!(passes_filter(&banned, &text));
    }

    #[test]
    fn filter_is_case_insensitive(word in "[a-z]{3,8}") {
        prop_assert!(!passes_filter(&[word.to_uppercase()], &word));
        prop_assert!(!passes_filter(&[word.clone()], &word.to_uppercase()));
    }

    #[test]
    fn priority_matches_are_a_subset_of_filter_semantics(
        word in "[a-z]{3,8}",
        text in "[a-z ]{0,40}",
    ) {
        // both helpers share substring semantics: a keyword hit implies
        // the same text would fail a filter carrying that keyword
        if has_priority_keyword(&[word.clone()], &text) {
            prop_assert!(!passes_filter(&[word], &text));
        }
    }

    #[test]
    fn resolved_mood_is_always_a_known_label(
        topic in ".{0,40}",
        raw_rules in prop::collection::vec(
            ("[a-z]{1,6}", prop::collection::vec("[a-z]{1,5}", 0..3)),
            0..4,
        ),
    ) {
        let rules: Vec<MoodRule> = raw_rules
            .into_iter()
            .map(|(label, triggers)| MoodRule { label, triggers })
            .collect();
        let resolved = resolve_mood(&rules, &topic);
        prop_assert!(
            resolved == NEUTRAL_MOOD || rules.iter().any(|r| r.label == resolved)
        );
    }

    #[test]
    fn earlier_rule_beats_later_rule_on_shared_trigger(word in "[a-z]{3,6}") {
        let rules = vec![
            MoodRule::new("first", &[word.as_str()]),
            MoodRule::new("second", &[word.as_str()]),
        ];
        let topic = format!("talking about {word} tonight");
        prop_assert_eq!(resolve_mood(&rules, &topic), "first");
    }

    #[test]
    fn chat_log_is_bounded_and_keeps_the_newest_messages(
        capacity in 1usize..16,
        texts in prop::collection::vec("[a-z]{0,10}", 0..64),
    ) {
        let mut log = ChatLog::new(capacity);
        for text in &texts {
            log.push(ChatMessage::new(None, text.clone()));
        }
        prop_assert!(log.len() <= capacity);

        let expected: Vec<String> = texts
            .iter()
            .rev()
            .take(capacity)
            .rev()
            .cloned()
            .collect();
        let actual: Vec<String> = log.iter().map(|m| m.text.clone()).collect();
        prop_assert_eq!(actual, expected);
    }
}
