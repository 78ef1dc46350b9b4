use once_cell::sync::Lazy;
use regex::Regex;

use crate::pipeline::schema::{CaptionCandidate, SafetyLevel};

/// Vocabulary that must not surface when the request is safe-for-work. The
/// validator does not reject these (the model may legitimately produce them
/// for nsfw requests); the ranker pushes them to the bottom for SFW requests.
static FORBIDDEN_SFW_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(onlyfans|porn|xxx|nude|naked|explicit)\b").expect("valid pattern")
});

#[derive(Debug, Clone)]
pub struct Selection {
    /// Ranked best-first; `final` is element 0 by contract.
    pub top_variants: Vec<CaptionCandidate>,
    pub reason: String,
}

struct Scored {
    index: usize,
    score: i32,
    notes: Vec<&'static str>,
}

fn score_candidate(candidate: &CaptionCandidate, nsfw_requested: bool) -> (i32, Vec<&'static str>) {
    let mut score = 0i32;
    let mut notes = Vec::new();

    if !nsfw_requested {
        if candidate.nsfw || candidate.safety_level == SafetyLevel::Unsafe {
            score -= 50;
            notes.push("flagged unsafe for a SFW request");
        } else if candidate.safety_level == SafetyLevel::Normal {
            score += 10;
            notes.push("clean safety profile");
        } else {
            score += 5;
        }

        let screened_text = format!("{} {}", candidate.caption, candidate.cta);
        if FORBIDDEN_SFW_PATTERN.is_match(&screened_text) {
            score -= 25;
            notes.push("contains flagged phrasing");
        }
    }

    if (3..=8).contains(&candidate.hashtags.len()) {
        score += 10;
        notes.push("hashtag count in range");
    }
    if candidate.titles.as_ref().is_some_and(|titles| !titles.is_empty()) {
        score += 5;
        notes.push("includes title options");
    }
    if candidate.alt.trim().chars().count() >= 20 {
        score += 5;
        notes.push("descriptive alt text");
    }
    if !candidate.cta.trim().is_empty() {
        score += 5;
    }

    (score, notes)
}

fn build_reason(total: usize, winner: &Scored) -> String {
    let strengths: Vec<&str> = winner
        .notes
        .iter()
        .copied()
        .filter(|note| !note.starts_with("flagged") && !note.starts_with("contains"))
        .collect();
    if strengths.is_empty() {
        format!(
            "selected candidate {} of {total} as the least-penalized option",
            winner.index + 1
        )
    } else {
        format!(
            "selected candidate {} of {total}: {}",
            winner.index + 1,
            strengths.join(", ")
        )
    }
}

/// Deterministic ranking over already-validated candidates. Ties keep model
/// output order (stable sort on score), so identical inputs always produce
/// the same `final` and variant order. Caller guarantees a non-empty slice.
pub fn rank(candidates: &[CaptionCandidate], nsfw_requested: bool, top_n: usize) -> Selection {
    let mut scored: Vec<Scored> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let (score, notes) = score_candidate(candidate, nsfw_requested);
            Scored {
                index,
                score,
                notes,
            }
        })
        .collect();
    scored.sort_by_key(|entry| -entry.score);

    let take = top_n.max(1).min(scored.len());
    let reason = build_reason(candidates.len(), &scored[0]);
    let top_variants = scored[..take]
        .iter()
        .map(|entry| candidates[entry.index].clone())
        .collect();

    Selection {
        top_variants,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(caption: &str, nsfw: bool, safety: SafetyLevel) -> CaptionCandidate {
        CaptionCandidate {
            caption: caption.to_string(),
            alt: "a descriptive alt text for accessibility".to_string(),
            hashtags: vec!["#one".into(), "#two".into(), "#three".into()],
            cta: "tell me below".to_string(),
            mood: "engaging".to_string(),
            style: "authentic".to_string(),
            safety_level: safety,
            nsfw,
            titles: None,
        }
    }

    #[test]
    fn ranking_is_deterministic() {
        let pool = vec![
            candidate("a", false, SafetyLevel::Normal),
            candidate("b", false, SafetyLevel::SpicySafe),
            candidate("c", false, SafetyLevel::Normal),
        ];
        let first = rank(&pool, false, 2);
        let second = rank(&pool, false, 2);
        assert_eq!(first.top_variants, second.top_variants);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn first_candidate_wins_ties() {
        let pool = vec![
            candidate("first", false, SafetyLevel::Normal),
            candidate("second", false, SafetyLevel::Normal),
        ];
        let selection = rank(&pool, false, 2);
        assert_eq!(selection.top_variants[0].caption, "first");
        assert_eq!(selection.top_variants[1].caption, "second");
    }

    #[test]
    fn unsafe_candidates_sink_on_sfw_requests() {
        let pool = vec![
            candidate("racy", true, SafetyLevel::Unsafe),
            candidate("clean", false, SafetyLevel::Normal),
        ];
        let selection = rank(&pool, false, 2);
        assert_eq!(selection.top_variants[0].caption, "clean");
    }

    #[test]
    fn nsfw_requests_do_not_penalize_unsafe() {
        let pool = vec![
            candidate("racy", true, SafetyLevel::Unsafe),
            candidate("clean", false, SafetyLevel::Normal),
        ];
        let selection = rank(&pool, true, 2);
        // Equal scores, so model order holds.
        assert_eq!(selection.top_variants[0].caption, "racy");
    }

    #[test]
    fn flagged_phrasing_is_screened_for_sfw() {
        let pool = vec![
            candidate("link in my onlyfans", false, SafetyLevel::Normal),
            candidate("sunset vibes", false, SafetyLevel::Normal),
        ];
        let selection = rank(&pool, false, 1);
        assert_eq!(selection.top_variants[0].caption, "sunset vibes");
    }

    #[test]
    fn top_n_caps_at_pool_size() {
        let pool = vec![candidate("only", false, SafetyLevel::Normal)];
        let selection = rank(&pool, false, 2);
        assert_eq!(selection.top_variants.len(), 1);
    }

    #[test]
    fn reason_is_human_readable() {
        let pool = vec![candidate("hello", false, SafetyLevel::Normal)];
        let selection = rank(&pool, false, 2);
        assert!(selection.reason.contains("candidate 1 of 1"));
        assert!(selection.reason.contains("clean safety profile"));
    }
}
