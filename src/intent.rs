//! IntentClassifier: maps a prompt to a ranked, confidence-scored set of
//! relevant specialists.
//!
//! Grounded on the proxy's `Parser` compile-once/reuse-per-request idiom
//! (`parser/mod.rs` pre-builds its lookup state once at construction; here
//! a `Vec<CompiledPattern>` of `Regex`es is built once and scanned per
//! request, never re-parsed).

use regex::Regex;
use std::sync::OnceLock;

/// One domain's score for a classified prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentScore {
    pub specialist_name: String,
    pub confidence: f64,
}

/// Result of classifying one prompt.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub scores: Vec<IntentScore>,
    /// Set when a risk marker ({legal, medical, finance, safety-critical,
    /// compliance}) appears, forcing cloud routing regardless of scores
    /// (spec.md §4.3).
    pub cloud_required: bool,
}

impl IntentResult {
    pub fn is_greeting(&self) -> bool {
        self.scores.len() == 1 && self.scores[0].specialist_name == "greeting"
    }

    pub fn top(&self) -> Option<&IntentScore> {
        self.scores.first()
    }
}

/// One curated regex rule contributing weight to a specialist's score.
#[derive(Debug, Clone)]
pub struct IntentPatternSpec {
    pub specialist: String,
    pub regex: String,
    pub weight: f64,
}

/// Hand-tuned pattern weights (spec.md §9 open question, resolved here and
/// exposed as config so callers can retune without recompiling the regex
/// set's *shape*). One strong keyword hit (fenced code block, multiple
/// arithmetic tokens) is weighted to outscore several weak hits.
#[derive(Debug, Clone)]
pub struct IntentConfig {
    pub patterns: Vec<IntentPatternSpec>,
    pub general_baseline: f64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        let patterns = vec![
            IntentPatternSpec {
                specialist: "math".to_string(),
                regex: r"\d+\s*[-+*/^]\s*\d+".to_string(),
                weight: 0.9,
            },
            IntentPatternSpec {
                specialist: "math".to_string(),
                regex: r"(?i)\b(sum|product|derivative|integral|equation|solve for)\b".to_string(),
                weight: 0.5,
            },
            IntentPatternSpec {
                specialist: "code".to_string(),
                regex: r"```".to_string(),
                weight: 1.0,
            },
            IntentPatternSpec {
                specialist: "code".to_string(),
                regex: r"(?i)\b(fn|def|class|function|import|return|variable|compile|stack trace)\b"
                    .to_string(),
                weight: 0.5,
            },
            IntentPatternSpec {
                specialist: "logic".to_string(),
                regex: r"(?i)\b(therefore|if and only if|proof|premise|syllogism|contradiction)\b"
                    .to_string(),
                weight: 0.7,
            },
            IntentPatternSpec {
                specialist: "logic".to_string(),
                regex: r"(?i)\b(and|or|not|implies)\b.*\b(and|or|not|implies)\b".to_string(),
                weight: 0.3,
            },
            IntentPatternSpec {
                specialist: "knowledge".to_string(),
                regex: r"(?i)^\s*(what|who|when|where|why|how|which)\b".to_string(),
                weight: 0.4,
            },
            IntentPatternSpec {
                specialist: "knowledge".to_string(),
                regex: r"(?i)\b(explain|describe|define|history of)\b".to_string(),
                weight: 0.4,
            },
        ];
        Self {
            patterns,
            general_baseline: 0.25,
        }
    }
}

struct CompiledPattern {
    specialist: String,
    regex: Regex,
    weight: f64,
}

fn greeting_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hello|hey|howdy|greetings|yo|good (morning|afternoon|evening))\b")
            .unwrap()
    })
}

fn risk_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(legal|medical|finance|financial|safety-critical|compliance)\b").unwrap()
    })
}

/// Compiled, deterministic classifier. Construction compiles every regex
/// once; `classify` is a cheap per-request scan.
pub struct IntentClassifier {
    patterns: Vec<CompiledPattern>,
    general_baseline: f64,
}

impl IntentClassifier {
    pub fn new(config: &IntentConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| CompiledPattern {
                specialist: p.specialist.clone(),
                regex: Regex::new(&p.regex).expect("intent pattern must compile"),
                weight: p.weight,
            })
            .collect();
        Self {
            patterns,
            general_baseline: config.general_baseline,
        }
    }

    /// Pure function of `prompt_text`: same input always yields the same
    /// output (spec.md §8 round-trip property).
    pub fn classify(&self, prompt_text: &str) -> IntentResult {
        let cloud_required = risk_regex().is_match(prompt_text);
        let non_whitespace_len = prompt_text.chars().filter(|c| !c.is_whitespace()).count();

        if non_whitespace_len < 15 || greeting_regex().is_match(prompt_text.trim()) {
            return IntentResult {
                scores: vec![IntentScore {
                    specialist_name: "greeting".to_string(),
                    confidence: 1.0,
                }],
                cloud_required,
            };
        }

        let mut totals: std::collections::BTreeMap<String, f64> = std::collections::BTreeMap::new();
        totals.insert("general".to_string(), self.general_baseline);
        for pattern in &self.patterns {
            if pattern.regex.is_match(prompt_text) {
                *totals.entry(pattern.specialist.clone()).or_insert(0.0) += pattern.weight;
            }
        }

        let sum: f64 = totals.values().sum();
        let mut scores: Vec<IntentScore> = totals
            .into_iter()
            .map(|(specialist_name, raw)| IntentScore {
                specialist_name,
                confidence: if sum > 0.0 { raw / sum } else { 0.0 },
            })
            .collect();

        scores.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.specialist_name.cmp(&b.specialist_name))
        });

        IntentResult {
            scores,
            cloud_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(&IntentConfig::default())
    }

    #[test]
    fn very_short_prompt_is_greeting() {
        let result = classifier().classify("hi");
        assert!(result.is_greeting());
        assert_eq!(result.top().unwrap().confidence, 1.0);
    }

    #[test]
    fn greeting_regex_matches_longer_greeting() {
        let result = classifier().classify("Good morning, how are things going today?");
        assert!(result.is_greeting());
    }

    #[test]
    fn arithmetic_prompt_favours_math() {
        let result = classifier().classify("Please compute what is 123 + 456 for me right now");
        assert_eq!(result.top().unwrap().specialist_name, "math");
    }

    #[test]
    fn fenced_code_block_favours_code() {
        let result = classifier().classify("Can you review this snippet ```fn main() {}``` please");
        assert_eq!(result.top().unwrap().specialist_name, "code");
    }

    #[test]
    fn risk_marker_forces_cloud_required_regardless_of_score() {
        let result = classifier().classify("What medical advice applies to this long symptom list");
        assert!(result.cloud_required);
    }

    #[test]
    fn classify_is_pure_and_deterministic() {
        let c = classifier();
        let a = c.classify("Explain HTTP/3 in two sentences please and thank you kindly");
        let b = c.classify("Explain HTTP/3 in two sentences please and thank you kindly");
        assert_eq!(a.scores, b.scores);
        assert_eq!(a.cloud_required, b.cloud_required);
    }

    #[test]
    fn tie_breaks_alphabetically_when_confidence_equal() {
        let result = classifier().classify("This prompt matches no domain pattern at all today");
        assert_eq!(result.top().unwrap().specialist_name, "general");
    }
}
