use crate::types::QualityScores;

/// Rule-based scoring used when no provider is configured or every provider
/// fails. Purely a function of its inputs: identical text in, identical
/// scores and explanation out.
pub fn heuristic_scores(title: &str, criteria: &str, outcomes: &[String]) -> QualityScores {
    let title = title.to_lowercase();
    let criteria = criteria.to_lowercase();

    let mut resolvability = 5i32;
    let mut clarity = 5i32;
    let mut manipulability_risk = 5i32;

    if criteria.contains("public") || criteria.contains("official") || criteria.contains("announced")
    {
        resolvability += 2;
    }
    if criteria.contains("verified") || criteria.contains("confirm") {
        resolvability += 1;
    }
    if criteria.len() > 100 {
        resolvability += 1;
    }

    // Binary markets tend to be the least ambiguous.
    if outcomes.len() == 2 {
        clarity += 1;
    }
    if criteria.contains("by") && has_year_token(&criteria) {
        clarity += 1;
    }
    if title.contains("will") || title.contains('?') {
        clarity += 1;
    }

    // Lower score means higher manipulation risk.
    if title.contains("celebrity")
        || title.contains("social")
        || title.contains("twitter")
        || title.contains("x.com")
    {
        manipulability_risk -= 1;
    }
    if criteria.contains("official") || criteria.contains("government") {
        manipulability_risk += 2;
    }

    let resolvability = clamp_score(resolvability);
    let clarity = clamp_score(clarity);
    let manipulability_risk = clamp_score(manipulability_risk);

    let explanation = format!(
        "Heuristic evaluation: Market appears {} resolvable with {} criteria. {} manipulation risk detected.",
        band(resolvability, "highly", "moderately", "poorly"),
        if clarity >= 7 { "clear" } else { "somewhat ambiguous" },
        band(manipulability_risk, "Low", "Moderate", "High"),
    );

    QualityScores {
        resolvability,
        clarity,
        manipulability_risk,
        explanation,
    }
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 10) as u8
}

fn band<'a>(score: u8, high: &'a str, mid: &'a str, low: &'a str) -> &'a str {
    if score >= 7 {
        high
    } else if score >= 4 {
        mid
    } else {
        low
    }
}

/// True when the text contains a standalone 20xx year, so "by March 2026"
/// counts as a deadline but a token id like "12025" does not.
fn has_year_token(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() < 4 {
        return false;
    }
    for i in 0..=bytes.len() - 4 {
        if bytes[i] == b'2'
            && bytes[i + 1] == b'0'
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
        {
            let starts_clean = i == 0 || !bytes[i - 1].is_ascii_digit();
            let ends_clean = i + 4 == bytes.len() || !bytes[i + 4].is_ascii_digit();
            if starts_clean && ends_clean {
                return true;
            }
        }
    }
    false
}
