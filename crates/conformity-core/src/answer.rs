//! Choice extraction from free-form model output.
//!
//! The prompt asks for `You: The best answer is: "(X) ..."`, but models drift
//! from the format, so extraction falls back through three marker tiers. The
//! exact tiers are load-bearing: previously scored data was produced with them
//! and re-scoring must agree.

/// Marker tiers, tried in order. The first marker present in the text decides;
/// later tiers are not consulted even if the match then fails validation.
const MARKERS: [&str; 3] = ["is: \"(", "is: (", "is ("];

/// Extract the single-letter choice following the last occurrence of the first
/// matching marker. Returns `None` when no marker matches, the letter is not
/// `A`..=`Z`, or it is not closed by `)`.
pub fn extract_choice(text: &str) -> Option<char> {
    for marker in MARKERS {
        let Some(pos) = text.rfind(marker) else {
            continue;
        };
        let tail = &text[pos + marker.len()..];
        let mut chars = tail.chars();
        let letter = chars.next()?;
        if chars.next() != Some(')') || !letter.is_ascii_uppercase() {
            return None;
        }
        return Some(letter);
    }
    None
}

/// Choice index for a letter: A maps to 0, Z to 25.
pub fn letter_index(letter: char) -> i64 {
    letter as i64 - 'A' as i64
}

/// Parsed choice index for a model output, or the `-1` sentinel when no choice
/// could be extracted.
pub fn predicted_index(text: &str) -> i64 {
    extract_choice(text).map_or(-1, letter_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_each_tier() {
        assert_eq!(
            extract_choice("You: The best answer is: \"(C) the answer\""),
            Some('C')
        );
        assert_eq!(extract_choice("the best answer is: (B) something"), Some('B'));
        assert_eq!(extract_choice("my answer is (A) yes"), Some('A'));
    }

    #[test]
    fn last_occurrence_wins_within_a_tier() {
        let text = "is: \"(A) no wait... The best answer is: \"(D) final\"";
        assert_eq!(extract_choice(text), Some('D'));
    }

    #[test]
    fn first_matching_tier_is_exclusive() {
        // Tier one matches but fails validation; tier three would have matched
        // and must not be consulted.
        let text = "the answer is: \"(maybe) but also is (B) here";
        assert_eq!(extract_choice(text), None);
    }

    #[test]
    fn rejects_missing_trigger_and_bad_letters() {
        assert_eq!(extract_choice("I refuse to answer."), None);
        assert_eq!(extract_choice("the answer is: (b) lowercase"), None);
        assert_eq!(extract_choice("the answer is: (AB"), None);
        assert_eq!(extract_choice("the answer is: ("), None);
    }

    #[test]
    fn sentinel_for_unparseable() {
        assert_eq!(predicted_index("no choice in sight"), -1);
        assert_eq!(predicted_index("the answer is: \"(E) x\""), 4);
    }
}
