//! Confidence scoring
//!
//! Aggregation policy: the confidence of a multi-line result is the arithmetic
//! mean of its line confidences. A result without lines scores 0.0. Both rules
//! are pure functions of their input, so repeated calls agree.

/// Confidence reported for a successful primary (cloud) recognition.
///
/// The hosted model does not return a calibrated score.
pub const PRIMARY_CONFIDENCE: f32 = 0.95;

/// Confidence assigned to text embedded in a PDF rather than recognized.
pub const EMBEDDED_TEXT_CONFIDENCE: f32 = 0.95;

/// Clamp to [0, 1]; NaN becomes 0.0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Mean of the given line confidences, 0.0 when there are none
pub fn aggregate<I>(scores: I) -> f32
where
    I: IntoIterator<Item = f32>,
{
    let (sum, count) = scores
        .into_iter()
        .fold((0.0_f64, 0_u32), |(sum, count), score| {
            (sum + clamp_unit(score) as f64, count + 1)
        });

    if count == 0 {
        return 0.0;
    }

    clamp_unit((sum / count as f64) as f32)
}

/// Score assumed for a line too short to judge
const LINE_PRIOR: f32 = 0.6;

/// Lines at least this long are scored on their own evidence alone
const FULL_EVIDENCE_CHARS: usize = 24;

/// Score one recognized line by how much it looks like real text.
///
/// Used for engines that do not report recognition probabilities. Garbled
/// recognition tends to produce symbol soup, one-letter fragments, runs of a
/// single character and odd spacing, so each of those lowers the score.
///
/// A detected line is often a single word or a short number, which says
/// little either way. The raw score is therefore blended with
/// [`LINE_PRIOR`] in proportion to the line's length, and spacing only
/// counts for lines with more than one word.
pub fn text_quality(text: &str) -> f32 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }

    let length = text.chars().count();
    let multi_word = text.split_whitespace().nth(1).is_some();
    let spacing_score = if multi_word { spacing(text) } else { 1.0 };

    let raw = 0.40 * character_mix(text)
        + 0.30 * word_shape(text)
        + 0.15 * spacing_score
        + 0.15 * run_penalty(text);

    let evidence = (length as f32 / FULL_EVIDENCE_CHARS as f32).min(1.0);
    clamp_unit(LINE_PRIOR + (raw - LINE_PRIOR) * evidence)
}

/// Share of letters and digits versus non-punctuation symbols.
///
/// Digits count as content: invoice and form lines are often mostly numbers.
fn character_mix(text: &str) -> f32 {
    let total = text.chars().count() as f32;
    let content = text.chars().filter(|c| c.is_alphanumeric()).count() as f32;
    let symbols = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !c.is_ascii_punctuation())
        .count() as f32;

    let symbol_score = 1.0 - (symbols / total * 10.0).min(1.0);
    let content_score = (content / total * 1.5).min(1.0);

    symbol_score * 0.6 + content_score * 0.4
}

/// Typical words are 4-8 characters; single-letter words are suspicious
fn word_shape(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.5;
    }

    let mean_len =
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32;
    let length_score = match mean_len as usize {
        0..=1 => 0.3,
        2..=3 => 0.7,
        4..=8 => 1.0,
        9..=12 => 0.8,
        _ => 0.4,
    };

    let single = words.iter().filter(|w| w.chars().count() == 1).count() as f32;
    let single_penalty = 1.0 - (single / words.len() as f32 * 1.5).min(0.5);

    length_score * single_penalty
}

/// Whitespace percentage; prose sits around 11-25%
fn spacing(text: &str) -> f32 {
    let total = text.chars().count() as f32;
    let whitespace = text.chars().filter(|c| c.is_whitespace()).count() as f32;

    match (whitespace / total * 100.0) as usize {
        0..=5 => 0.5,
        6..=10 => 0.8,
        11..=25 => 1.0,
        26..=40 => 0.7,
        _ => 0.3,
    }
}

/// Longest run of one repeated non-space character
fn run_penalty(text: &str) -> f32 {
    let mut longest = 1;
    let mut run = 1;
    let mut prev = None;

    for c in text.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
        prev = Some(c);
    }

    match longest {
        1..=3 => 1.0,
        4..=5 => 0.8,
        6..=10 => 0.5,
        _ => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_is_mean() {
        let score = aggregate([0.9, 0.8]);
        assert!((score - 0.85).abs() < 1e-6, "got {}", score);
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        assert_eq!(aggregate(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_aggregate_clamps_inputs() {
        assert_eq!(aggregate([2.0, 1.0]), 1.0);
        assert_eq!(aggregate([-1.0, f32::NAN]), 0.0);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let scores = [0.31, 0.77, 0.52, 0.99];
        assert_eq!(aggregate(scores), aggregate(scores));
    }

    #[test]
    fn test_empty_line_scores_zero() {
        assert_eq!(text_quality(""), 0.0);
        assert_eq!(text_quality("   "), 0.0);
    }

    #[test]
    fn test_short_line_stays_near_prior() {
        for line in ["Hi", "42", "§"] {
            let score = text_quality(line);
            assert!((score - LINE_PRIOR).abs() < 0.05, "{} -> {}", line, score);
        }
    }

    #[test]
    fn test_longer_clean_line_gains_confidence() {
        let word = text_quality("Invoice");
        let sentence = text_quality("Invoice for consulting services");
        assert!(word > LINE_PRIOR, "got {}", word);
        assert!(sentence > word, "{} <= {}", sentence, word);
        assert!(sentence > 0.9, "got {}", sentence);
    }

    #[test]
    fn test_prose_scores_high() {
        let score = text_quality("The quick brown fox jumps over the lazy dog.");
        assert!(score > 0.9, "Expected > 0.9, got {}", score);
    }

    #[test]
    fn test_numeric_line_is_not_penalized() {
        let score = text_quality("Invoice 20240042 total 00001250");
        assert!(score > 0.9, "Expected > 0.9, got {}", score);
    }

    #[test]
    fn test_symbol_soup_scores_below_prior() {
        let score = text_quality("§±®©¥€£¢¤ §±®©¥€£¢¤ §±®©¥€£¢¤");
        assert!(score < 0.55, "Expected < 0.55, got {}", score);
    }

    #[test]
    fn test_fragments_score_lower() {
        let score = text_quality("a b c d e f g h i j k l m n o p");
        assert!(score < 0.7, "Expected < 0.7, got {}", score);
    }

    #[test]
    fn test_repeated_run_penalized() {
        assert_eq!(run_penalty("Hello World"), 1.0);
        assert!(run_penalty("Hellooooo World") < 1.0);
    }

    #[test]
    fn test_quality_in_unit_range() {
        for line in ["INVOICE #123", "12345 67890", "!!!!!!!!!!!!!!!!", "ok"] {
            let score = text_quality(line);
            assert!((0.0..=1.0).contains(&score), "{} -> {}", line, score);
        }
    }
}
