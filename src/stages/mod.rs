use std::path::PathBuf;

use crate::error::PipelineResult;
use crate::layout::classifier_name;
use crate::pipeline::{
    Artifact, ArtifactRole, PipelineContext, Stage, StageParameters, ToolHost, Workflow,
};
use crate::prompt::{Resolver, StageParameter};
use crate::validation::{self, Validator};

pub mod export;
pub mod training;
pub mod tree;

pub const PRIMER_F_515: &str = "GTGYCAGCMGCCGCGGTAA";
pub const PRIMER_R_806: &str = "GGACTACNVGGGTWTCTAAT";
pub const DEFAULT_TRUNC_LEN_F: &str = "275";
pub const DEFAULT_TRUNC_LEN_R: &str = "250";
pub const DEFAULT_MAX_DEPTH: &str = "5000";

/// Entry of the stage listing shown by `ampliflow stages`.
#[derive(Debug, Clone, Copy)]
pub struct StageInfo {
    pub workflow: Workflow,
    pub name: &'static str,
    pub description: &'static str,
}

pub const CATALOGUE: &[StageInfo] = &[
    stage_info(Workflow::Dataset, "import", "import paired-end reads (Casava 1.8 layout)"),
    stage_info(Workflow::Dataset, "summarize-demux", "quality summary of the imported reads"),
    stage_info(Workflow::Dataset, "trim", "cutadapt primer trimming"),
    stage_info(Workflow::Dataset, "summarize-trimmed", "quality summary of the trimmed reads"),
    stage_info(Workflow::Dataset, "denoise", "DADA2 paired-end denoising and summaries"),
    stage_info(
        Workflow::Dataset,
        "tree-<strategy>",
        "rooted phylogeny, one of the tree strategies",
    ),
    stage_info(Workflow::Dataset, "classify", "naive-Bayes taxonomic classification and bar plots"),
    stage_info(Workflow::Dataset, "rarefy", "alpha rarefaction curves"),
    stage_info(Workflow::Dataset, "export", "BIOM/Newick/FASTA/TSV export and taxonomy merge"),
    stage_info(Workflow::Classifier, "import-reference", "import reference sequences and taxonomy"),
    stage_info(
        Workflow::Classifier,
        "extract-reads",
        "extract the amplified region from the reference",
    ),
    stage_info(Workflow::Classifier, "train", "fit the naive-Bayes classifier"),
    stage_info(Workflow::Classifier, "self-test", "classify the extracted reference reads"),
];

const fn stage_info(
    workflow: Workflow,
    name: &'static str,
    description: &'static str,
) -> StageInfo {
    StageInfo {
        workflow,
        name,
        description,
    }
}

/// Solicits one parameter and hands it back resolved.
pub(crate) fn ask(
    resolver: &mut Resolver,
    name: &'static str,
    prompt: &str,
    default: impl Into<String>,
    validator: Validator,
) -> PipelineResult<StageParameter> {
    let mut param = StageParameter::new(name, prompt, default).validate_with(validator);
    resolver.resolve(&mut param)?;
    Ok(param)
}

fn flag(value: bool) -> String {
    value.to_string()
}

pub struct ImportReads;

impl Stage for ImportReads {
    fn name(&self) -> &'static str {
        "import"
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([(
            "input_format".to_string(),
            "CasavaOneEightSingleLanePerSampleDirFmt".to_string(),
        )])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let output = ctx.layout.demux_reads();
        tools.invoke(
            ctx.toolkit()
                .args(["tools", "import"])
                .param("--type", "SampleData[PairedEndSequencesWithQuality]")
                .path("--input-path", &ctx.layout.reads_dir())
                .param("--input-format", "CasavaOneEightSingleLanePerSampleDirFmt")
                .output("--output-path", &output),
        )?;
        Ok(vec![Artifact::new(
            ArtifactRole::DemultiplexedReads,
            output,
            self.name(),
        )])
    }
}

/// `demux summarize` of either the imported or the trimmed reads.
pub struct SummarizeReads {
    source: ArtifactRole,
}

impl SummarizeReads {
    pub fn demultiplexed() -> Self {
        Self {
            source: ArtifactRole::DemultiplexedReads,
        }
    }

    pub fn trimmed() -> Self {
        Self {
            source: ArtifactRole::TrimmedReads,
        }
    }

    pub fn output(&self, ctx: &PipelineContext) -> PathBuf {
        match self.source {
            ArtifactRole::TrimmedReads => ctx.layout.trimmed_summary(),
            _ => ctx.layout.demux_summary(),
        }
    }
}

impl Stage for SummarizeReads {
    fn name(&self) -> &'static str {
        match self.source {
            ArtifactRole::TrimmedReads => "summarize-trimmed",
            _ => "summarize-demux",
        }
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        match self.source {
            ArtifactRole::TrimmedReads => &[ArtifactRole::TrimmedReads],
            _ => &[ArtifactRole::DemultiplexedReads],
        }
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let reads = ctx.require(self.name(), self.source)?;
        let output = self.output(ctx);
        tools.invoke(
            ctx.toolkit()
                .args(["demux", "summarize"])
                .path("--i-data", reads)
                .output("--o-visualization", &output),
        )?;
        Ok(vec![Artifact::new(
            ArtifactRole::Visualization,
            output,
            self.name(),
        )])
    }
}

pub struct TrimPrimers {
    pub primer_f: String,
    pub primer_r: String,
    pub discard_untrimmed: bool,
}

impl TrimPrimers {
    pub fn prompt(resolver: &mut Resolver) -> PipelineResult<Self> {
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
        let discard_untrimmed =
            resolver.ask("Discard read pairs in which no primer was found?", true)?;
        Ok(Self {
            primer_f: primer_f.parse()?,
            primer_r: primer_r.parse()?,
            discard_untrimmed,
        })
    }
}

impl Stage for TrimPrimers {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::DemultiplexedReads]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([
            ("primer_f".to_string(), self.primer_f.clone()),
            ("primer_r".to_string(), self.primer_r.clone()),
            ("discard_untrimmed".to_string(), flag(self.discard_untrimmed)),
        ])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let reads = ctx.require(self.name(), ArtifactRole::DemultiplexedReads)?;
        let output = ctx.layout.trimmed_reads();
        let mut command = ctx
            .toolkit()
            .args(["cutadapt", "trim-paired"])
            .path("--i-demultiplexed-sequences", reads)
            .param("--p-front-f", &self.primer_f)
            .param("--p-front-r", &self.primer_r)
            .param("--p-cores", ctx.threads);
        if self.discard_untrimmed {
            command = command.arg("--p-discard-untrimmed");
        }
        tools.invoke(command.output("--o-trimmed-sequences", &output))?;
        Ok(vec![Artifact::new(
            ArtifactRole::TrimmedReads,
            output,
            self.name(),
        )])
    }
}

pub struct DenoisePaired {
    pub trim_left_f: u32,
    pub trim_left_r: u32,
    pub trunc_len_f: u32,
    pub trunc_len_r: u32,
}

impl DenoisePaired {
    pub fn prompt(resolver: &mut Resolver) -> PipelineResult<Self> {
        let trim_left_f = ask(
            resolver,
            "trim_left_f",
            "Bases to trim from the 5' end of forward reads",
            "0",
            Box::new(validation::trim_left),
        )?;
        let trim_left_r = ask(
            resolver,
            "trim_left_r",
            "Bases to trim from the 5' end of reverse reads",
            "0",
            Box::new(validation::trim_left),
        )?;
        let trunc_len_f = ask(
            resolver,
            "trunc_len_f",
            "Forward read truncation length (0 disables)",
            DEFAULT_TRUNC_LEN_F,
            Box::new(validation::truncation_length),
        )?;
        let trunc_len_r = ask(
            resolver,
            "trunc_len_r",
            "Reverse read truncation length (0 disables)",
            DEFAULT_TRUNC_LEN_R,
            Box::new(validation::truncation_length),
        )?;
        Ok(Self {
            trim_left_f: trim_left_f.parse()?,
            trim_left_r: trim_left_r.parse()?,
            trunc_len_f: trunc_len_f.parse()?,
            trunc_len_r: trunc_len_r.parse()?,
        })
    }
}

impl Stage for DenoisePaired {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::TrimmedReads]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([
            ("trim_left_f".to_string(), self.trim_left_f.to_string()),
            ("trim_left_r".to_string(), self.trim_left_r.to_string()),
            ("trunc_len_f".to_string(), self.trunc_len_f.to_string()),
            ("trunc_len_r".to_string(), self.trunc_len_r.to_string()),
        ])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let reads = ctx.require(self.name(), ArtifactRole::TrimmedReads)?;
        let metadata = ctx.metadata_file(self.name())?;
        let layout = &ctx.layout;

        tools.invoke(
            ctx.toolkit()
                .args(["dada2", "denoise-paired"])
                .path("--i-demultiplexed-seqs", reads)
                .param("--p-trim-left-f", self.trim_left_f)
                .param("--p-trim-left-r", self.trim_left_r)
                .param("--p-trunc-len-f", self.trunc_len_f)
                .param("--p-trunc-len-r", self.trunc_len_r)
                .param("--p-n-threads", ctx.threads)
                .output("--o-table", &layout.feature_table())
                .output("--o-representative-sequences", &layout.rep_seqs())
                .output("--o-denoising-stats", &layout.denoising_stats()),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["feature-table", "summarize"])
                .path("--i-table", &layout.feature_table())
                .path("--m-sample-metadata-file", metadata)
                .output("--o-visualization", &layout.feature_table_summary()),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["feature-table", "tabulate-seqs"])
                .path("--i-data", &layout.rep_seqs())
                .output("--o-visualization", &layout.rep_seqs_summary()),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["metadata", "tabulate"])
                .path("--m-input-file", &layout.denoising_stats())
                .output("--o-visualization", &layout.denoising_stats_summary()),
        )?;

        Ok(vec![
            Artifact::new(ArtifactRole::FeatureTable, layout.feature_table(), self.name()),
            Artifact::new(
                ArtifactRole::RepresentativeSequences,
                layout.rep_seqs(),
                self.name(),
            ),
            Artifact::new(ArtifactRole::DenoisingStats, layout.denoising_stats(), self.name()),
            Artifact::new(
                ArtifactRole::Visualization,
                layout.feature_table_summary(),
                self.name(),
            ),
            Artifact::new(
                ArtifactRole::Visualization,
                layout.rep_seqs_summary(),
                self.name(),
            ),
            Artifact::new(
                ArtifactRole::Visualization,
                layout.denoising_stats_summary(),
                self.name(),
            ),
        ])
    }
}

pub struct ClassifyTaxonomy {
    pub classifier: PathBuf,
    pub classifier_name: String,
}

impl ClassifyTaxonomy {
    pub fn prompt(resolver: &mut Resolver, ctx: &PipelineContext) -> PipelineResult<Self> {
        let default = ctx
            .config
            .resolve_path(ctx.layout.root(), &ctx.config.default_classifier);
        let classifier = ask(
            resolver,
            "classifier",
            "Path to the trained classifier artifact",
            default.to_string_lossy(),
            Box::new(validation::existing_file),
        )?;
        let classifier = PathBuf::from(classifier.parse::<String>()?);
        Ok(Self {
            classifier_name: classifier_name(&classifier),
            classifier,
        })
    }
}

impl Stage for ClassifyTaxonomy {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[
            ArtifactRole::Classifier,
            ArtifactRole::RepresentativeSequences,
            ArtifactRole::FeatureTable,
        ]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([
            (
                "classifier".to_string(),
                self.classifier.to_string_lossy().to_string(),
            ),
            ("classifier_name".to_string(), self.classifier_name.clone()),
        ])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let classifier = ctx.require(self.name(), ArtifactRole::Classifier)?;
        let rep_seqs = ctx.require(self.name(), ArtifactRole::RepresentativeSequences)?;
        let table = ctx.require(self.name(), ArtifactRole::FeatureTable)?;
        let metadata = ctx.metadata_file(self.name())?;
        let taxonomy = ctx.layout.taxonomy(&self.classifier_name);
        let summary = ctx.layout.taxonomy_summary(&self.classifier_name);
        let barplot = ctx.layout.taxa_barplot(&self.classifier_name);

        tools.invoke(
            ctx.toolkit()
                .args(["feature-classifier", "classify-sklearn"])
                .path("--i-classifier", classifier)
                .path("--i-reads", rep_seqs)
                .param("--p-n-jobs", ctx.threads)
                .output("--o-classification", &taxonomy),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["metadata", "tabulate"])
                .path("--m-input-file", &taxonomy)
                .output("--o-visualization", &summary),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["taxa", "barplot"])
                .path("--i-table", table)
                .path("--i-taxonomy", &taxonomy)
                .path("--m-metadata-file", metadata)
                .output("--o-visualization", &barplot),
        )?;

        Ok(vec![
            Artifact::new(ArtifactRole::Taxonomy, taxonomy, self.name()),
            Artifact::new(ArtifactRole::Visualization, summary, self.name()),
            Artifact::new(ArtifactRole::Visualization, barplot, self.name()),
        ])
    }
}

pub struct RarefactionCurve {
    pub max_depth: u32,
}

impl RarefactionCurve {
    pub fn prompt(resolver: &mut Resolver, ctx: &PipelineContext) -> PipelineResult<Self> {
        resolver.note(&format!(
            "Pick a depth near the lowest per-sample frequency you are willing to keep (see {}).",
            ctx.layout.feature_table_summary().display()
        ));
        let max_depth = ask(
            resolver,
            "max_depth",
            "Maximum rarefaction depth",
            DEFAULT_MAX_DEPTH,
            Box::new(validation::positive_integer),
        )?;
        Ok(Self {
            max_depth: max_depth.parse()?,
        })
    }
}

impl Stage for RarefactionCurve {
    fn name(&self) -> &'static str {
        "rarefy"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[ArtifactRole::FeatureTable, ArtifactRole::RootedTree]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::from([("max_depth".to_string(), self.max_depth.to_string())])
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let table = ctx.require(self.name(), ArtifactRole::FeatureTable)?;
        let tree = ctx.require(self.name(), ArtifactRole::RootedTree)?;
        let metadata = ctx.metadata_file(self.name())?;
        let output = ctx.layout.rarefaction_curve();
        tools.invoke(
            ctx.toolkit()
                .args(["diversity", "alpha-rarefaction"])
                .path("--i-table", table)
                .path("--i-phylogeny", tree)
                .param("--p-max-depth", self.max_depth)
                .path("--m-metadata-file", metadata)
                .output("--o-visualization", &output),
        )?;
        Ok(vec![Artifact::new(
            ArtifactRole::Visualization,
            output,
            self.name(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PilotConfig;
    use crate::layout::ProjectLayout;
    use crate::prompt::ScriptedConsole;

    fn resolver(answers: &[&str]) -> Resolver {
        Resolver::new(Box::new(ScriptedConsole::new(answers.iter().copied())), None)
    }

    #[test]
    fn denoise_defaults() {
        let mut r = resolver(&["", "", "", "", "", "", "", ""]);
        let stage = DenoisePaired::prompt(&mut r).unwrap();
        assert_eq!(stage.trim_left_f, 0);
        assert_eq!(stage.trim_left_r, 0);
        assert_eq!(stage.trunc_len_f, 275);
        assert_eq!(stage.trunc_len_r, 250);
    }

    #[test]
    fn rejecting_one_value_keeps_the_others() {
        // trim_left_f accepted, trim_left_r first rejected at confirmation.
        let mut r = resolver(&["5", "y", "7", "n", "3", "y", "", "", "", ""]);
        let stage = DenoisePaired::prompt(&mut r).unwrap();
        assert_eq!(stage.trim_left_f, 5);
        assert_eq!(stage.trim_left_r, 3);
        assert_eq!(stage.trunc_len_f, 275);
    }

    #[test]
    fn trim_defaults_to_v4_primers() {
        let mut r = resolver(&["", "", "", "", ""]);
        let stage = TrimPrimers::prompt(&mut r).unwrap();
        assert_eq!(stage.primer_f, PRIMER_F_515);
        assert_eq!(stage.primer_r, PRIMER_R_806);
        assert!(stage.discard_untrimmed);
        assert_eq!(stage.parameters()["discard_untrimmed"], "true");
    }

    #[test]
    fn classifier_name_comes_from_path() {
        let temp = tempfile::tempdir().unwrap();
        let classifier = temp.path().join("gg-13-8-classifier.qza");
        std::fs::write(&classifier, b"").unwrap();
        let ctx = PipelineContext::new(
            Workflow::Dataset,
            ProjectLayout::new(temp.path()),
            PilotConfig::default(),
        );
        let mut r = resolver(&[classifier.to_str().unwrap(), "y"]);
        let stage = ClassifyTaxonomy::prompt(&mut r, &ctx).unwrap();
        assert_eq!(stage.classifier_name, "gg-13-8");
    }

    #[test]
    fn catalogue_covers_both_workflows() {
        assert!(CATALOGUE.iter().any(|s| s.workflow == Workflow::Dataset));
        assert!(CATALOGUE.iter().any(|s| s.workflow == Workflow::Classifier));
    }
}
