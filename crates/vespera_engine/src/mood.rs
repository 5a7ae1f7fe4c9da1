//! Mood resolution: maps a topic string to a mood label through the
//! configured trigger rules.

use vespera_core::{MoodRule, NEUTRAL_MOOD};

/// Resolve a topic to a mood label.
///
/// Rules are scanned in configuration order and the first rule with any
/// trigger appearing case-insensitively in the topic wins. There is no
/// scoring and no tie-breaking beyond order. When nothing matches the
/// result is [`NEUTRAL_MOOD`]. Empty triggers are skipped, so a rule
/// with an empty trigger list can never match.
pub fn resolve_mood<'a>(rules: &'a [MoodRule], topic: &str) -> &'a str {
    let lowered = topic.to_lowercase();
    for rule in rules {
        let hit = rule.triggers.iter().any(|trigger| {
            let trigger = trigger.to_lowercase();
            !trigger.is_empty() && lowered.contains(&trigger)
        });
        if hit {
            return &rule.label;
        }
    }
    NEUTRAL_MOOD
}
