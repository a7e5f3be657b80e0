use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Outcome of checking one candidate value. `Warn` is advisory: the value is
/// kept and the warning shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Warn(String),
    Reject(String),
}

impl Verdict {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Verdict::Reject(_))
    }
}

pub type Validator = Box<dyn Fn(&str) -> Verdict>;

pub const SUGGESTED_TRUNCATION: RangeInclusive<u32> = 100..=300;
pub const SUGGESTED_TRIM_LEFT: RangeInclusive<u32> = 0..=30;
pub const MIN_BOOTSTRAP_REPLICATES: u32 = 1000;

const IUPAC_NUCLEOTIDES: &str = "ACGTURYSWKMBDHVN";

fn parse_u32(value: &str) -> Result<u32, Verdict> {
    value
        .parse::<u32>()
        .map_err(|_| Verdict::Reject(format!("'{value}' is not a non-negative integer")))
}

pub fn positive_integer(value: &str) -> Verdict {
    match parse_u32(value) {
        Ok(0) => Verdict::Reject("value must be at least 1".into()),
        Ok(_) => Verdict::Accept,
        Err(verdict) => verdict,
    }
}

pub fn non_negative_integer(value: &str) -> Verdict {
    match parse_u32(value) {
        Ok(_) => Verdict::Accept,
        Err(verdict) => verdict,
    }
}

/// Forward/reverse truncation length; 0 disables truncation.
pub fn truncation_length(value: &str) -> Verdict {
    match parse_u32(value) {
        Ok(0) => Verdict::Accept,
        Ok(len) if SUGGESTED_TRUNCATION.contains(&len) => Verdict::Accept,
        Ok(len) => Verdict::Warn(format!(
            "truncation length {len} is outside the suggested range {}-{}",
            SUGGESTED_TRUNCATION.start(),
            SUGGESTED_TRUNCATION.end()
        )),
        Err(verdict) => verdict,
    }
}

pub fn trim_left(value: &str) -> Verdict {
    match parse_u32(value) {
        Ok(len) if SUGGESTED_TRIM_LEFT.contains(&len) => Verdict::Accept,
        Ok(len) => Verdict::Warn(format!(
            "trim length {len} is outside the suggested range {}-{}",
            SUGGESTED_TRIM_LEFT.start(),
            SUGGESTED_TRIM_LEFT.end()
        )),
        Err(verdict) => verdict,
    }
}

pub fn bootstrap_replicates(value: &str) -> Verdict {
    match parse_u32(value) {
        Ok(n) if n >= MIN_BOOTSTRAP_REPLICATES => Verdict::Accept,
        Ok(n) => Verdict::Reject(format!(
            "ultrafast bootstrap needs at least {MIN_BOOTSTRAP_REPLICATES} replicates, got {n}"
        )),
        Err(verdict) => verdict,
    }
}

pub fn primer(value: &str) -> Verdict {
    if value.is_empty() {
        return Verdict::Reject("primer sequence cannot be empty".into());
    }
    match value
        .chars()
        .find(|c| !IUPAC_NUCLEOTIDES.contains(c.to_ascii_uppercase()))
    {
        Some(bad) => Verdict::Reject(format!("'{bad}' is not an IUPAC nucleotide code")),
        None => Verdict::Accept,
    }
}

/// Names end up in directory names, so no separators or whitespace.
pub fn identifier(value: &str) -> Verdict {
    if value.is_empty() {
        Verdict::Reject("name cannot be empty".into())
    } else if value
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '\\')
    {
        Verdict::Reject("name cannot contain whitespace or path separators".into())
    } else {
        Verdict::Accept
    }
}

pub fn existing_file(value: &str) -> Verdict {
    if Path::new(value).is_file() {
        Verdict::Accept
    } else {
        Verdict::Reject(format!("file '{value}' does not exist"))
    }
}

/// Sample metadata: readable, non-empty, tab-separated header whose first
/// column names the sample identifier. Lines starting with `#` after the
/// header are directives and do not count as samples.
pub fn metadata_file(value: &str) -> Verdict {
    let path = Path::new(value);
    if !path.is_file() {
        return Verdict::Reject(format!("metadata file '{value}' does not exist"));
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => return Verdict::Reject(format!("metadata file '{value}' is unreadable: {err}")),
    };
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Verdict::Reject(format!("metadata file '{value}' is empty"));
    };
    let sample_column = header.split('\t').next().unwrap_or_default().trim();
    if sample_column.is_empty() {
        return Verdict::Reject("metadata header has no sample identifier column".into());
    }
    if !lines.any(|line| !line.starts_with('#')) {
        return Verdict::Warn(format!("metadata file '{value}' lists no samples"));
    }
    Verdict::Accept
}

pub fn one_of(choices: &'static [&'static str]) -> Validator {
    Box::new(move |value: &str| {
        if choices.contains(&value) {
            Verdict::Accept
        } else {
            Verdict::Reject(format!("choose one of: {}", choices.join(", ")))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn truncation_lengths_in_range_are_accepted_verbatim() {
        assert_eq!(truncation_length("275"), Verdict::Accept);
        assert_eq!(truncation_length("250"), Verdict::Accept);
        assert_eq!(truncation_length("0"), Verdict::Accept);
    }

    #[test]
    fn out_of_range_truncation_only_warns() {
        let verdict = truncation_length("9999");
        assert!(matches!(verdict, Verdict::Warn(_)));
        assert!(!verdict.is_blocking());
        assert!(truncation_length("abc").is_blocking());
    }

    #[test]
    fn trim_left_checks_its_own_value() {
        assert_eq!(trim_left("0"), Verdict::Accept);
        assert!(matches!(trim_left("275"), Verdict::Warn(_)));
        assert!(trim_left("-1").is_blocking());
    }

    #[test]
    fn primers_accept_degenerate_codes() {
        assert_eq!(primer("GTGYCAGCMGCCGCGGTAA"), Verdict::Accept);
        assert_eq!(primer("ggactacnvgggtwtctaat"), Verdict::Accept);
        assert!(primer("GTGX").is_blocking());
        assert!(primer("").is_blocking());
    }

    #[test]
    fn integers() {
        assert_eq!(non_negative_integer("0"), Verdict::Accept);
        assert!(positive_integer("0").is_blocking());
        assert!(non_negative_integer("1.5").is_blocking());
    }

    #[test]
    fn bootstrap_minimum_is_enforced() {
        assert_eq!(bootstrap_replicates("1000"), Verdict::Accept);
        assert!(bootstrap_replicates("999").is_blocking());
    }

    #[test]
    fn identifiers_reject_separators() {
        assert_eq!(identifier("silva-138"), Verdict::Accept);
        assert!(identifier("a/b").is_blocking());
        assert!(identifier("a b").is_blocking());
    }

    #[test]
    fn metadata_file_rules() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("missing.tsv");
        assert!(metadata_file(missing.to_str().unwrap()).is_blocking());

        let empty = temp.path().join("empty.tsv");
        fs::write(&empty, "").unwrap();
        assert!(metadata_file(empty.to_str().unwrap()).is_blocking());

        let header_only = temp.path().join("header.tsv");
        fs::write(&header_only, "sample-id\tbody-site\n#q2:types\tcategorical\n").unwrap();
        assert!(matches!(
            metadata_file(header_only.to_str().unwrap()),
            Verdict::Warn(_)
        ));

        let good = temp.path().join("metadata.tsv");
        fs::write(&good, "sample-id\tbody-site\nS1\tgut\nS2\tskin\n").unwrap();
        assert_eq!(metadata_file(good.to_str().unwrap()), Verdict::Accept);
    }

    #[test]
    fn one_of_lists_choices() {
        let validator = one_of(&["1", "2", "3"]);
        assert_eq!(validator("2"), Verdict::Accept);
        assert_eq!(
            validator("4"),
            Verdict::Reject("choose one of: 1, 2, 3".into())
        );
    }
}
