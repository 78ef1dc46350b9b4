/// Static voice persona table. Each entry maps a voice id to the instruction
/// block injected into every prompt for that voice. Lookup is a pure function
/// over this table so prompt construction stays deterministic and testable
/// without touching the provider.
const VOICE_GUIDES: &[(&str, &str)] = &[
    (
        "flirty_playful",
        "Voice: flirty and playful. Tease, don't beg. Use light innuendo, winking \
         asides, and short punchy sentences. Emojis sparingly (max 2). Never use \
         corporate phrasing, never say 'content', never stack exclamation marks.",
    ),
    (
        "seductive_goddess",
        "Voice: seductive and commanding. Speak from a pedestal; the reader earns \
         attention, not the other way around. Rich sensory vocabulary, slow pacing, \
         no emojis, no slang abbreviations, no pleading calls to action.",
    ),
    (
        "cozy_girl_next_door",
        "Voice: warm, approachable girl-next-door. Conversational contractions, \
         small everyday details, gentle humor. Avoid anything that reads as \
         scripted, salesy, or breathless hype.",
    ),
    (
        "edgy_baddie",
        "Voice: confident and a little sharp. Deadpan flexes, dry one-liners, \
         zero apologies. Lowercase is fine. Forbidden: hearts, sparkle emojis, \
         'hey guys', and any caption that asks for approval.",
    ),
    (
        "gamer_bestie",
        "Voice: chaotic gamer bestie. Game and internet-culture references, \
         self-deprecating jokes, all-caps for emphasis at most once. Forbidden: \
         forced memes older than the audience, explainer tone.",
    ),
    (
        "luxury_minimal",
        "Voice: luxury minimalism. Few words, wide spacing of ideas, confident \
         understatement. No emojis, no hashtags inside the caption body, no \
         exclamation marks, never mention price.",
    ),
];

/// Returns the instruction block for a voice id, or `None` when the id is
/// unrecognized. Callers omit voice guidance on `None` rather than failing.
pub fn voice_guide_block(voice: &str) -> Option<&'static str> {
    let voice = voice.trim();
    VOICE_GUIDES
        .iter()
        .find(|(id, _)| *id == voice)
        .map(|(_, guide)| *guide)
}

/// All known voice ids, for CLI help and request validation messages.
pub fn known_voices() -> impl Iterator<Item = &'static str> {
    VOICE_GUIDES.iter().map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_deterministic() {
        for (id, _) in VOICE_GUIDES {
            let first = voice_guide_block(id).expect("known voice");
            let second = voice_guide_block(id).expect("known voice");
            assert_eq!(first, second);
            assert!(!first.trim().is_empty());
        }
    }

    #[test]
    fn unknown_voice_is_omitted_not_an_error() {
        assert!(voice_guide_block("corporate_memo").is_none());
        assert!(voice_guide_block("").is_none());
    }

    #[test]
    fn lookup_trims_surrounding_whitespace() {
        assert_eq!(
            voice_guide_block(" flirty_playful "),
            voice_guide_block("flirty_playful")
        );
    }

    #[test]
    fn known_voices_covers_table() {
        assert_eq!(known_voices().count(), VOICE_GUIDES.len());
    }
}
