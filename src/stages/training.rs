use std::path::PathBuf;

use crate::error::PipelineResult;
use crate::pipeline::{Artifact, ArtifactRole, PipelineContext, Stage, StageParameters, ToolHost};
use crate::prompt::Resolver;
use crate::stages::{PRIMER_F_515, PRIMER_R_806, ask};
use crate::validation::{self, Verdict};

pub const DEFAULT_CLASSIFIER_NAME: &str = "silva-138-99-515-806";
pub const DEFAULT_REFERENCE_SEQUENCES: &str = "data/raw/reference/sequences.fasta";
pub const DEFAULT_REFERENCE_TAXONOMY: &str = "data/raw/reference/taxonomy.tsv";
pub const DEFAULT_MIN_LENGTH: &str = "100";
pub const DEFAULT_MAX_LENGTH: &str = "400";

const REFERENCE_SEQUENCES: &str = "ref-seqs.qza";
const REFERENCE_TAXONOMY: &str = "ref-taxonomy.qza";
const REFERENCE_READS: &str = "ref-seqs-extracted.qza";
const CLASSIFIER: &str = "classifier.qza";
const SELF_TEST_TAXONOMY: &str = "self-test-taxonomy.qza";
const SELF_TEST_SUMMARY: &str = "self-test-taxonomy.qzv";

pub struct ImportReference {
    pub name: String,
    pub sequences: PathBuf,
    pub taxonomy: PathBuf,
}

impl ImportReference {
    pub fn prompt(resolver: &mut Resolver, ctx: &PipelineContext) -> PipelineResult<Self> {
        let root = ctx.layout.root();
        let name = ask(
            resolver,
            "classifier_name",
            "Name for the new classifier",
            DEFAULT_CLASSIFIER_NAME,
            Box::new(validation::identifier),
        )?;
        let sequences = ask(
            resolver,
            "reference_sequences",
            "Reference sequences (FASTA)",
            root.join(DEFAULT_REFERENCE_SEQUENCES).to_string_lossy(),
            Box::new(validation::existing_file),
        )?;
        let taxonomy = ask(
            resolver,
            "reference_taxonomy",
            "Reference taxonomy (headerless TSV)",
            root.join(DEFAULT_REFERENCE_TAXONOMY).to_string_lossy(),
            Box::new(validation::existing_file),
        )?;
        Ok(Self {
            name: name.parse()?,
            sequences: PathBuf::from(sequences.parse::<String>()?),
            taxonomy: PathBuf::from(taxonomy.parse::<String>()?),
        })
    }
}

impl Stage for ImportReference {
    fn name(&self) -> &'static str {
        "import-reference"
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([
            ("classifier_name".to_string(), self.name.clone()),
            (
                "reference_sequences".to_string(),
                self.sequences.to_string_lossy().to_string(),
            ),
            (
                "reference_taxonomy".to_string(),
                self.taxonomy.to_string_lossy().to_string(),
            ),
        ])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let sequences = ctx.layout.classifier_file(&self.name, REFERENCE_SEQUENCES);
        let taxonomy = ctx.layout.classifier_file(&self.name, REFERENCE_TAXONOMY);
        tools.invoke(
            ctx.toolkit()
                .args(["tools", "import"])
                .param("--type", "FeatureData[Sequence]")
                .path("--input-path", &self.sequences)
                .output("--output-path", &sequences),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["tools", "import"])
                .param("--type", "FeatureData[Taxonomy]")
                .param("--input-format", "HeaderlessTSVTaxonomyFormat")
                .path("--input-path", &self.taxonomy)
                .output("--output-path", &taxonomy),
        )?;
        Ok(vec![
            Artifact::new(ArtifactRole::ReferenceSequences, sequences, self.name()),
            Artifact::new(ArtifactRole::ReferenceTaxonomy, taxonomy, self.name()),
        ])
    }
}

/// `extract-reads` over the primer pair. Lengths of 0 disable the
/// corresponding filter.
pub struct ExtractReads {
    pub name: String,
    pub primer_f: String,
    pub primer_r: String,
    pub trunc_len: u32,
    pub min_length: u32,
    pub max_length: u32,
}

impl ExtractReads {
    pub fn prompt(resolver: &mut Resolver, name: &str) -> PipelineResult<Self> {
        let primer_f = ask(
            resolver,
            "primer_f",
            "Forward primer sequence",
            PRIMER_F_515,
            Box::new(validation::primer),
        )?;
        let primer_r = ask(
            resolver,
            "primer_r",
            "Reverse primer sequence",
            PRIMER_R_806,
            Box::new(validation::primer),
        )?;
        let trunc_len = ask(
            resolver,
            "trunc_len",
            "Truncate extracted reads to this length (0 disables)",
            "0",
            Box::new(validation::non_negative_integer),
        )?;
        let min_length = ask(
            resolver,
            "min_length",
            "Minimum extracted read length (0 disables)",
            DEFAULT_MIN_LENGTH,
            Box::new(validation::non_negative_integer),
        )?;
        let min_length: u32 = min_length.parse()?;
        let max_length = ask(
            resolver,
            "max_length",
            "Maximum extracted read length (0 disables)",
            DEFAULT_MAX_LENGTH,
            Box::new(move |value: &str| check_max_length(value, min_length)),
        )?;
        Ok(Self {
            name: name.to_string(),
            primer_f: primer_f.parse()?,
            primer_r: primer_r.parse()?,
            trunc_len: trunc_len.parse()?,
            min_length,
            max_length: max_length.parse()?,
        })
    }
}

fn check_max_length(value: &str, min_length: u32) -> Verdict {
    match value.parse::<u32>() {
        Ok(0) => Verdict::Accept,
        Ok(max) if max < min_length => Verdict::Reject(format!(
            "maximum length {max} is below the minimum length {min_length}"
        )),
        Ok(_) => Verdict::Accept,
        Err(_) => validation::non_negative_integer(value),
    }
}

impl Stage for ExtractReads {
    fn name(&self) -> &'static str {
        "extract-reads"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::ReferenceSequences]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([
            ("primer_f".to_string(), self.primer_f.clone()),
            ("primer_r".to_string(), self.primer_r.clone()),
            ("trunc_len".to_string(), self.trunc_len.to_string()),
            ("min_length".to_string(), self.min_length.to_string()),
            ("max_length".to_string(), self.max_length.to_string()),
        ])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let sequences = ctx.require(self.name(), ArtifactRole::ReferenceSequences)?;
        let reads = ctx.layout.classifier_file(&self.name, REFERENCE_READS);
        tools.invoke(
            ctx.toolkit()
                .args(["feature-classifier", "extract-reads"])
                .path("--i-sequences", sequences)
                .param("--p-f-primer", &self.primer_f)
                .param("--p-r-primer", &self.primer_r)
                .param("--p-trunc-len", self.trunc_len)
                .param("--p-min-length", self.min_length)
                .param("--p-max-length", self.max_length)
                .param("--p-n-jobs", ctx.threads)
                .output("--o-reads", &reads),
        )?;
        Ok(vec![Artifact::new(
            ArtifactRole::ReferenceReads,
            reads,
            self.name(),
        )])
    }
}

pub struct TrainClassifier {
    pub name: String,
}

impl Stage for TrainClassifier {
    fn name(&self) -> &'static str {
        "train"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::ReferenceReads, ArtifactRole::ReferenceTaxonomy]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([("classifier_name".to_string(), self.name.clone())])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let reads = ctx.require(self.name(), ArtifactRole::ReferenceReads)?;
        let taxonomy = ctx.require(self.name(), ArtifactRole::ReferenceTaxonomy)?;
        let classifier = ctx.layout.classifier_file(&self.name, CLASSIFIER);
        tools.invoke(
            ctx.toolkit()
                .args(["feature-classifier", "fit-classifier-naive-bayes"])
                .path("--i-reference-reads", reads)
                .path("--i-reference-taxonomy", taxonomy)
                .output("--o-classifier", &classifier),
        )?;
        Ok(vec![Artifact::new(
            ArtifactRole::Classifier,
            classifier,
            self.name(),
        )])
    }
}

/// Classifies the extracted reference reads with the freshly trained
/// classifier as a sanity check.
pub struct SelfTest {
    pub name: String,
}

impl Stage for SelfTest {
    fn name(&self) -> &'static str {
        "self-test"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::Classifier, ArtifactRole::ReferenceReads]
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let classifier = ctx.require(self.name(), ArtifactRole::Classifier)?;
        let reads = ctx.require(self.name(), ArtifactRole::ReferenceReads)?;
        let taxonomy = ctx.layout.classifier_file(&self.name, SELF_TEST_TAXONOMY);
        let summary = ctx.layout.classifier_file(&self.name, SELF_TEST_SUMMARY);
        tools.invoke(
            ctx.toolkit()
                .args(["feature-classifier", "classify-sklearn"])
                .path("--i-classifier", classifier)
                .path("--i-reads", reads)
                .param("--p-n-jobs", ctx.threads)
                .output("--o-classification", &taxonomy),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["metadata", "tabulate"])
                .path("--m-input-file", &taxonomy)
                .output("--o-visualization", &summary),
        )?;
        Ok(vec![
            Artifact::new(ArtifactRole::Taxonomy, taxonomy, self.name()),
            Artifact::new(ArtifactRole::Visualization, summary, self.name()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PilotConfig;
    use crate::layout::ProjectLayout;
    use crate::pipeline::Workflow;
    use crate::prompt::ScriptedConsole;

    fn resolver(answers: &[&str]) -> Resolver {
        Resolver::new(Box::new(ScriptedConsole::new(answers.iter().copied())), None)
    }

    #[test]
    fn extract_defaults() {
        let mut r = resolver(&["", "", "", "", "", "", "", "", "", ""]);
        let stage = ExtractReads::prompt(&mut r, "v4").unwrap();
        assert_eq!(stage.primer_f, PRIMER_F_515);
        assert_eq!(stage.trunc_len, 0);
        assert_eq!(stage.min_length, 100);
        assert_eq!(stage.max_length, 400);
    }

    #[test]
    fn max_length_below_min_is_rejected() {
        assert!(check_max_length("50", 100).is_blocking());
        assert_eq!(check_max_length("0", 100), Verdict::Accept);
        assert_eq!(check_max_length("100", 100), Verdict::Accept);
        assert!(check_max_length("x", 100).is_blocking());
    }

    #[test]
    fn reference_defaults_live_under_raw() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(
            Workflow::Classifier,
            ProjectLayout::new(temp.path()),
            PilotConfig::default(),
        );
        let seqs = temp.path().join(DEFAULT_REFERENCE_SEQUENCES);
        std::fs::create_dir_all(seqs.parent().unwrap()).unwrap();
        std::fs::write(&seqs, b">a\nACGT\n").unwrap();
        std::fs::write(temp.path().join(DEFAULT_REFERENCE_TAXONOMY), b"a\tk__B\n").unwrap();

        let mut r = resolver(&["v4-515", "y", "", "", "", ""]);
        let stage = ImportReference::prompt(&mut r, &ctx).unwrap();
        assert_eq!(stage.name, "v4-515");
        assert_eq!(stage.sequences, seqs);
        assert_eq!(stage.parameters()["classifier_name"], "v4-515");
    }
}
