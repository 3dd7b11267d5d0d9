//! Roster builder: selects simulation-eligible characters for one cycle.
//!
//! A pure, deterministic function of the current character records and the
//! active scene: every `ArcImportant` or `Significant` character not present
//! in the scene gets a [`RosterEntry`] snapshot. No side effects; same
//! inputs produce the same output.

use storyloom_types::{CharacterRecord, RosterEntry, SceneTracker};

/// Build the planning roster for one cycle.
///
/// Characters present in the scene are excluded -- their activity is
/// on-screen, not offscreen. Entries come out in the order of the input
/// records, so the roster is deterministic.
pub fn build_roster(characters: &[CharacterRecord], scene: &SceneTracker) -> Vec<RosterEntry> {
    characters
        .iter()
        .filter(|c| !scene.contains_character(&c.name))
        .map(roster_entry)
        .collect()
}

/// Snapshot one character into a roster row.
fn roster_entry(character: &CharacterRecord) -> RosterEntry {
    RosterEntry {
        name: character.name.clone(),
        importance: character.importance,
        location: character.location(),
        last_simulated: character
            .simulation_meta
            .as_ref()
            .and_then(|m| m.last_simulated.clone()),
        goals_summary: profile_summary(character, "goals"),
        routine_summary: profile_summary(character, "routine"),
        key_relationships: character
            .relationships
            .iter()
            .map(|r| r.target.clone())
            .collect(),
        relationship_notes: relationship_notes(character),
        pending_intent: character
            .simulation_meta
            .as_ref()
            .map(|m| m.pending_protagonist_interaction.clone())
            .unwrap_or_default(),
    }
}

/// Serialize one profile section to a compact JSON summary, if present.
fn profile_summary(character: &CharacterRecord, key: &str) -> Option<String> {
    character
        .profile
        .get(key)
        .map(|value| serde_json::to_string(value).unwrap_or_default())
        .filter(|s| !s.is_empty())
}

/// Format relationship notes for the planner prompt.
fn relationship_notes(character: &CharacterRecord) -> Option<String> {
    if character.relationships.is_empty() {
        return None;
    }

    let notes: Vec<String> = character
        .relationships
        .iter()
        .map(|r| {
            let dynamic = match &r.dynamic {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            format!("Target name: {}\n{dynamic}", r.target)
        })
        .collect();

    Some(notes.join("\n\n"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use storyloom_types::{ImportanceTier, RelationshipNote, SimulationMeta};

    use super::*;

    fn make_character(name: &str, importance: ImportanceTier) -> CharacterRecord {
        CharacterRecord {
            name: name.to_owned(),
            importance,
            ..CharacterRecord::default()
        }
    }

    fn scene_with(present: &[&str]) -> SceneTracker {
        SceneTracker {
            time: String::from("Day 3, dusk"),
            location: String::from("The Lantern Inn"),
            weather: String::from("Rain"),
            characters_present: present.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn excludes_characters_present_in_scene() {
        let characters = vec![
            make_character("Alice", ImportanceTier::ArcImportant),
            make_character("Bob", ImportanceTier::Significant),
            make_character("Carol", ImportanceTier::ArcImportant),
        ];
        let roster = build_roster(&characters, &scene_with(&["Carol"]));

        let names: Vec<&str> = roster.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn same_inputs_same_output() {
        let characters = vec![
            make_character("Alice", ImportanceTier::ArcImportant),
            make_character("Bob", ImportanceTier::Significant),
        ];
        let scene = scene_with(&[]);
        assert_eq!(
            build_roster(&characters, &scene),
            build_roster(&characters, &scene)
        );
    }

    #[test]
    fn snapshots_goals_and_location() {
        let mut alice = make_character("Alice", ImportanceTier::ArcImportant);
        alice
            .profile
            .insert(String::from("goals"), json!(["find the ledger"]));
        alice
            .tracker
            .insert(String::from("location"), json!("Mill Road"));

        let roster = build_roster(&[alice], &scene_with(&[]));
        let entry = roster.first().unwrap();
        assert_eq!(entry.location, "Mill Road");
        assert_eq!(
            entry.goals_summary.as_deref(),
            Some("[\"find the ledger\"]")
        );
        assert!(entry.routine_summary.is_none());
    }

    #[test]
    fn formats_relationship_notes() {
        let mut alice = make_character("Alice", ImportanceTier::ArcImportant);
        alice.relationships = vec![
            RelationshipNote {
                target: String::from("Bob"),
                dynamic: json!("uneasy partners"),
                ..RelationshipNote::default()
            },
            RelationshipNote {
                target: String::from("Dana"),
                dynamic: json!("owes her money"),
                ..RelationshipNote::default()
            },
        ];

        let roster = build_roster(&[alice], &scene_with(&[]));
        let entry = roster.first().unwrap();
        assert_eq!(entry.key_relationships, vec!["Bob", "Dana"]);
        let notes = entry.relationship_notes.as_deref().unwrap();
        assert!(notes.contains("Target name: Bob"));
        assert!(notes.contains("uneasy partners"));
    }

    #[test]
    fn carries_pending_intent() {
        let mut alice = make_character("Alice", ImportanceTier::ArcImportant);
        alice.simulation_meta = Some(SimulationMeta {
            last_simulated: Some(String::from("Day 2, night")),
            pending_protagonist_interaction: json!({"urgency": "high"}),
            ..SimulationMeta::default()
        });

        let roster = build_roster(&[alice], &scene_with(&[]));
        let entry = roster.first().unwrap();
        assert_eq!(entry.last_simulated.as_deref(), Some("Day 2, night"));
        assert_eq!(entry.pending_intent, json!({"urgency": "high"}));
    }
}
