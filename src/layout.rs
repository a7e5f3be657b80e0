use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::pipeline::Workflow;
use crate::stages::tree::TreeStrategy;

pub const READS_DIR: &str = "data/raw/fastq-reads";
pub const METADATA_FILE: &str = "data/metadata.tsv";
pub const TAXONOMY_HEADER: &str = "OTUID\ttaxonomy\tconfidence";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir().join("raw")
    }

    pub fn reads_dir(&self) -> PathBuf {
        self.root.join(READS_DIR)
    }

    pub fn interim_dir(&self) -> PathBuf {
        self.data_dir().join("interim")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn default_metadata(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn interim(&self, dir: &str, file: &str) -> PathBuf {
        self.interim_dir().join(dir).join(file)
    }

    pub fn demux_reads(&self) -> PathBuf {
        self.interim("demux", "demux-paired-end.qza")
    }

    pub fn demux_summary(&self) -> PathBuf {
        self.interim("demux", "demux-paired-end.qzv")
    }

    pub fn trimmed_reads(&self) -> PathBuf {
        self.interim("trimmed", "trimmed-seqs.qza")
    }

    pub fn trimmed_summary(&self) -> PathBuf {
        self.interim("trimmed", "trimmed-seqs.qzv")
    }

    pub fn feature_table(&self) -> PathBuf {
        self.interim("dada2", "table.qza")
    }

    pub fn feature_table_summary(&self) -> PathBuf {
        self.interim("dada2", "table.qzv")
    }

    pub fn rep_seqs(&self) -> PathBuf {
        self.interim("dada2", "rep-seqs.qza")
    }

    pub fn rep_seqs_summary(&self) -> PathBuf {
        self.interim("dada2", "rep-seqs.qzv")
    }

    pub fn denoising_stats(&self) -> PathBuf {
        self.interim("dada2", "denoising-stats.qza")
    }

    pub fn denoising_stats_summary(&self) -> PathBuf {
        self.interim("dada2", "denoising-stats.qzv")
    }

    /// One directory per strategy so that strategies never share outputs.
    pub fn tree_dir(&self, strategy: &TreeStrategy) -> PathBuf {
        self.interim_dir().join(format!("tree-{}", strategy.slug()))
    }

    pub fn tree_file(&self, strategy: &TreeStrategy, file: &str) -> PathBuf {
        self.tree_dir(strategy).join(file)
    }

    pub fn taxonomy_dir(&self, classifier_name: &str) -> PathBuf {
        self.interim_dir().join(format!("{classifier_name}-taxonomy"))
    }

    pub fn taxonomy(&self, classifier_name: &str) -> PathBuf {
        self.taxonomy_dir(classifier_name).join("taxonomy.qza")
    }

    pub fn taxonomy_summary(&self, classifier_name: &str) -> PathBuf {
        self.taxonomy_dir(classifier_name).join("taxonomy.qzv")
    }

    pub fn taxa_barplot(&self, classifier_name: &str) -> PathBuf {
        self.taxonomy_dir(classifier_name).join("taxa-bar-plots.qzv")
    }

    pub fn rarefaction_curve(&self) -> PathBuf {
        self.interim("rarefaction", "alpha-rarefaction.qzv")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.interim_dir().join("exported")
    }

    pub fn export_file(&self, file: &str) -> PathBuf {
        self.export_dir().join(file)
    }

    pub fn classifier_dir(&self, name: &str) -> PathBuf {
        self.interim_dir().join("classifiers").join(name)
    }

    pub fn classifier_file(&self, name: &str, file: &str) -> PathBuf {
        self.classifier_dir(name).join(file)
    }

    pub fn stage_log(&self, workflow: Workflow, stage: &str) -> PathBuf {
        self.logs_dir()
            .join(workflow.slug())
            .join(format!("{stage}.log"))
    }

    pub fn run_record(&self, workflow: Workflow, started_at: DateTime<Utc>) -> PathBuf {
        self.logs_dir().join(format!(
            "{}-run-{}.yaml",
            workflow.slug(),
            started_at.format("%Y%m%dT%H%M%SZ")
        ))
    }
}

/// Name used for the taxonomy directory of a classifier file:
/// `.../classifiers/<name>/classifier.qza` gives `<name>`,
/// `silva-138-classifier.qza` gives `silva-138`.
pub fn classifier_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "classifier".to_string());
    if stem == "classifier" {
        if let Some(parent) = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            && !parent.is_empty()
        {
            return parent;
        }
        return stem;
    }
    stem.strip_suffix("-classifier")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tree::TreeStrategy;

    #[test]
    fn taxonomy_is_namespaced_by_classifier() {
        let layout = ProjectLayout::new("/proj");
        assert_eq!(
            layout.taxonomy("silva-138"),
            PathBuf::from("/proj/data/interim/silva-138-taxonomy/taxonomy.qza")
        );
    }

    #[test]
    fn strategies_get_distinct_tree_dirs() {
        let layout = ProjectLayout::new("/proj");
        let dirs: Vec<_> = [
            TreeStrategy::MafftFasttree,
            TreeStrategy::IqtreeBootstrap { replicates: 1000 },
            TreeStrategy::FragmentInsertion {
                reference: PathBuf::from("/refs/sepp.qza"),
            },
        ]
        .iter()
        .map(|strategy| layout.tree_dir(strategy))
        .collect();
        assert_ne!(dirs[0], dirs[1]);
        assert_ne!(dirs[1], dirs[2]);
        assert_ne!(dirs[0], dirs[2]);
        assert_eq!(
            dirs[2],
            PathBuf::from("/proj/data/interim/tree-fragment-insertion-sepp")
        );
    }

    #[test]
    fn paths_are_stable() {
        let a = ProjectLayout::new("/proj");
        let b = ProjectLayout::new("/proj");
        assert_eq!(a.rep_seqs(), b.rep_seqs());
        assert_eq!(
            a.stage_log(Workflow::Dataset, "denoise"),
            PathBuf::from("/proj/logs/dataset-builder/denoise.log")
        );
    }

    #[test]
    fn classifier_names() {
        assert_eq!(
            classifier_name(Path::new("data/interim/classifiers/v4-515/classifier.qza")),
            "v4-515"
        );
        assert_eq!(
            classifier_name(Path::new("/refs/silva-138-99-nb-classifier.qza")),
            "silva-138-99-nb"
        );
        assert_eq!(classifier_name(Path::new("gg.qza")), "gg");
    }
}
