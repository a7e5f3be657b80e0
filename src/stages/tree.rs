use std::path::{Path, PathBuf};

use crate::error::PipelineResult;
use crate::pipeline::{
    Artifact, ArtifactRole, PipelineContext, Stage, StageParameters, ToolHost,
};
use crate::prompt::Resolver;
use crate::stages::ask;
use crate::validation::{self, one_of};

pub const DEFAULT_CHOICE: &str = "3";
pub const DEFAULT_BOOTSTRAP_REPLICATES: &str = "1000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeStrategy {
    MafftFasttree,
    IqtreeBootstrap { replicates: u32 },
    FragmentInsertion { reference: PathBuf },
}

type StrategyPrompt = fn(&mut Resolver, &PipelineContext) -> PipelineResult<TreeStrategy>;

pub struct StrategyEntry {
    pub choice: &'static str,
    pub slug: &'static str,
    pub label: &'static str,
    prompt: StrategyPrompt,
}

static CATALOGUE: [StrategyEntry; 3] = [
    StrategyEntry {
        choice: "1",
        slug: "mafft-fasttree",
        label: "MAFFT alignment + FastTree (fast, de novo)",
        prompt: prompt_mafft,
    },
    StrategyEntry {
        choice: "2",
        slug: "iqtree-bootstrap",
        label: "MAFFT alignment + IQ-TREE ultrafast bootstrap (slow, de novo)",
        prompt: prompt_iqtree,
    },
    StrategyEntry {
        choice: "3",
        slug: "fragment-insertion-sepp",
        label: "SEPP fragment insertion into a reference phylogeny",
        prompt: prompt_sepp,
    },
];

const CHOICES: &[&str] = &["1", "2", "3"];

fn prompt_mafft(_resolver: &mut Resolver, _ctx: &PipelineContext) -> PipelineResult<TreeStrategy> {
    Ok(TreeStrategy::MafftFasttree)
}

fn prompt_iqtree(resolver: &mut Resolver, _ctx: &PipelineContext) -> PipelineResult<TreeStrategy> {
    let replicates = ask(
        resolver,
        "bootstrap_replicates",
        "Number of ultrafast bootstrap replicates",
        DEFAULT_BOOTSTRAP_REPLICATES,
        Box::new(validation::bootstrap_replicates),
    )?;
    Ok(TreeStrategy::IqtreeBootstrap {
        replicates: replicates.parse()?,
    })
}

fn prompt_sepp(resolver: &mut Resolver, ctx: &PipelineContext) -> PipelineResult<TreeStrategy> {
    let default = ctx
        .config
        .resolve_path(ctx.layout.root(), &ctx.config.sepp_reference);
    let reference = ask(
        resolver,
        "sepp_reference",
        "SEPP reference database artifact",
        default.to_string_lossy(),
        Box::new(validation::existing_file),
    )?;
    Ok(TreeStrategy::FragmentInsertion {
        reference: PathBuf::from(reference.parse::<String>()?),
    })
}

impl TreeStrategy {
    pub fn catalogue() -> &'static [StrategyEntry] {
        &CATALOGUE
    }

    pub fn lookup(choice: &str) -> Option<&'static StrategyEntry> {
        CATALOGUE.iter().find(|entry| entry.choice == choice)
    }

    /// Asks for the method, then for that method's own parameters.
    pub fn select(resolver: &mut Resolver, ctx: &PipelineContext) -> PipelineResult<Self> {
        let menu = CATALOGUE
            .iter()
            .map(|entry| format!("  {}) {}", entry.choice, entry.label))
            .collect::<Vec<_>>()
            .join("\n");
        resolver.note(&format!("Tree construction methods:\n{menu}"));
        let choice = ask(
            resolver,
            "tree_method",
            "Select a tree construction method",
            DEFAULT_CHOICE,
            one_of(CHOICES),
        )?;
        let choice = choice.parse::<String>()?;
        let entry = Self::lookup(&choice).unwrap_or(&CATALOGUE[2]);
        (entry.prompt)(resolver, ctx)
    }

    pub fn slug(&self) -> &'static str {
        match self {
            TreeStrategy::MafftFasttree => CATALOGUE[0].slug,
            TreeStrategy::IqtreeBootstrap { .. } => CATALOGUE[1].slug,
            TreeStrategy::FragmentInsertion { .. } => CATALOGUE[2].slug,
        }
    }

    pub fn stage(&self) -> BuildTree {
        BuildTree {
            strategy: self.clone(),
        }
    }
}

pub struct BuildTree {
    strategy: TreeStrategy,
}

impl Stage for BuildTree {
    fn name(&self) -> &'static str {
        match self.strategy {
            TreeStrategy::MafftFasttree => "tree-mafft-fasttree",
            TreeStrategy::IqtreeBootstrap { .. } => "tree-iqtree-bootstrap",
            TreeStrategy::FragmentInsertion { .. } => "tree-fragment-insertion-sepp",
        }
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        match self.strategy {
            TreeStrategy::FragmentInsertion { .. } => &[
                ArtifactRole::RepresentativeSequences,
                ArtifactRole::FeatureTable,
            ],
            _ => &[ArtifactRole::RepresentativeSequences],
        }
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::from([(
            "strategy".to_string(),
            self.strategy.slug().to_string(),
        )]);
        match &self.strategy {
            TreeStrategy::MafftFasttree => {}
            TreeStrategy::IqtreeBootstrap { replicates } => {
                params.insert("bootstrap_replicates".into(), replicates.to_string());
            }
            TreeStrategy::FragmentInsertion { reference } => {
                params.insert(
                    "sepp_reference".into(),
                    reference.to_string_lossy().to_string(),
                );
            }
        }
        params
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        match &self.strategy {
            TreeStrategy::MafftFasttree => self.mafft_fasttree(ctx, tools),
            TreeStrategy::IqtreeBootstrap { replicates } => {
                self.iqtree_bootstrap(ctx, tools, *replicates)
            }
            TreeStrategy::FragmentInsertion { reference } => {
                self.fragment_insertion(ctx, tools, reference)
            }
        }
    }
}

impl BuildTree {
    fn file(&self, ctx: &PipelineContext, name: &str) -> PathBuf {
        ctx.layout.tree_file(&self.strategy, name)
    }

    fn mafft_fasttree(
        &self,
        ctx: &PipelineContext,
        tools: &mut ToolHost<'_>,
    ) -> PipelineResult<Vec<Artifact>> {
        let rep_seqs = ctx.require(self.name(), ArtifactRole::RepresentativeSequences)?;
        let aligned = self.file(ctx, "aligned-rep-seqs.qza");
        let masked = self.file(ctx, "masked-aligned-rep-seqs.qza");
        let unrooted = self.file(ctx, "unrooted-tree.qza");
        let rooted = self.file(ctx, "rooted-tree.qza");

        tools.invoke(
            ctx.toolkit()
                .args(["phylogeny", "align-to-tree-mafft-fasttree"])
                .path("--i-sequences", rep_seqs)
                .param("--p-n-threads", ctx.threads)
                .output("--o-alignment", &aligned)
                .output("--o-masked-alignment", &masked)
                .output("--o-tree", &unrooted)
                .output("--o-rooted-tree", &rooted),
        )?;

        Ok(vec![
            Artifact::new(ArtifactRole::Alignment, aligned, self.name()),
            Artifact::new(ArtifactRole::MaskedAlignment, masked, self.name()),
            Artifact::new(ArtifactRole::UnrootedTree, unrooted, self.name()),
            Artifact::new(ArtifactRole::RootedTree, rooted, self.name()),
        ])
    }

    fn iqtree_bootstrap(
        &self,
        ctx: &PipelineContext,
        tools: &mut ToolHost<'_>,
        replicates: u32,
    ) -> PipelineResult<Vec<Artifact>> {
        let rep_seqs = ctx.require(self.name(), ArtifactRole::RepresentativeSequences)?;
        let aligned = self.file(ctx, "aligned-rep-seqs.qza");
        let masked = self.file(ctx, "masked-aligned-rep-seqs.qza");
        let unrooted = self.file(ctx, "unrooted-tree.qza");
        let rooted = self.file(ctx, "rooted-tree.qza");

        tools.invoke(
            ctx.toolkit()
                .args(["alignment", "mafft"])
                .path("--i-sequences", rep_seqs)
                .param("--p-n-threads", ctx.threads)
                .output("--o-alignment", &aligned),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["alignment", "mask"])
                .path("--i-alignment", &aligned)
                .output("--o-masked-alignment", &masked),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["phylogeny", "iqtree-ultrafast-bootstrap"])
                .path("--i-alignment", &masked)
                .param("--p-bootstrap-replicates", replicates)
                .param("--p-n-cores", ctx.threads)
                .output("--o-tree", &unrooted),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["phylogeny", "midpoint-root"])
                .path("--i-tree", &unrooted)
                .output("--o-rooted-tree", &rooted),
        )?;

        Ok(vec![
            Artifact::new(ArtifactRole::Alignment, aligned, self.name()),
            Artifact::new(ArtifactRole::MaskedAlignment, masked, self.name()),
            Artifact::new(ArtifactRole::UnrootedTree, unrooted, self.name()),
            Artifact::new(ArtifactRole::RootedTree, rooted, self.name()),
        ])
    }

    /// The insertion tree is rooted already; features SEPP could not place are
    /// filtered out and the filtered table takes over the feature-table role.
    fn fragment_insertion(
        &self,
        ctx: &PipelineContext,
        tools: &mut ToolHost<'_>,
        reference: &Path,
    ) -> PipelineResult<Vec<Artifact>> {
        let rep_seqs = ctx.require(self.name(), ArtifactRole::RepresentativeSequences)?;
        let table = ctx.require(self.name(), ArtifactRole::FeatureTable)?;
        let tree = self.file(ctx, "insertion-tree.qza");
        let placements = self.file(ctx, "insertion-placements.qza");
        let filtered = self.file(ctx, "filtered-table.qza");
        let removed = self.file(ctx, "removed-table.qza");

        tools.invoke(
            ctx.toolkit()
                .args(["fragment-insertion", "sepp"])
                .path("--i-representative-sequences", rep_seqs)
                .path("--i-reference-database", reference)
                .param("--p-threads", ctx.threads)
                .output("--o-tree", &tree)
                .output("--o-placements", &placements),
        )?;
        tools.invoke(
            ctx.toolkit()
                .args(["fragment-insertion", "filter-features"])
                .path("--i-table", table)
                .path("--i-tree", &tree)
                .output("--o-filtered-table", &filtered)
                .output("--o-removed-table", &removed),
        )?;

        Ok(vec![
            Artifact::new(ArtifactRole::RootedTree, tree, self.name()),
            Artifact::new(ArtifactRole::Placements, placements, self.name()),
            Artifact::new(ArtifactRole::FeatureTable, filtered, self.name()),
            Artifact::new(ArtifactRole::RemovedFeatures, removed, self.name()),
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
    use tempfile::tempdir;

    fn context(root: &std::path::Path) -> PipelineContext {
        PipelineContext::new(
            Workflow::Dataset,
            ProjectLayout::new(root),
            PilotConfig::default(),
        )
    }

    fn resolver(answers: &[&str]) -> Resolver {
        Resolver::new(Box::new(ScriptedConsole::new(answers.iter().copied())), None)
    }

    #[test]
    fn lookup_maps_choices_to_slugs() {
        assert_eq!(TreeStrategy::lookup("1").unwrap().slug, "mafft-fasttree");
        assert_eq!(TreeStrategy::lookup("2").unwrap().slug, "iqtree-bootstrap");
        assert_eq!(TreeStrategy::lookup("3").unwrap().slug, "fragment-insertion-sepp");
        assert!(TreeStrategy::lookup("4").is_none());
    }

    #[test]
    fn default_choice_is_fragment_insertion() {
        let temp = tempdir().unwrap();
        let ctx = context(temp.path());
        let reference = temp.path().join("data/raw/sepp-refs-gg-13-8.qza");
        std::fs::create_dir_all(reference.parent().unwrap()).unwrap();
        std::fs::write(&reference, b"").unwrap();

        let mut r = resolver(&["", "", "", ""]);
        let strategy = TreeStrategy::select(&mut r, &ctx).unwrap();
        assert_eq!(strategy, TreeStrategy::FragmentInsertion { reference });
    }

    #[test]
    fn iqtree_collects_replicates() {
        let temp = tempdir().unwrap();
        let ctx = context(temp.path());
        let mut r = resolver(&["2", "y", "500", "2000", "y"]);
        let strategy = TreeStrategy::select(&mut r, &ctx).unwrap();
        assert_eq!(strategy, TreeStrategy::IqtreeBootstrap { replicates: 2000 });
        assert_eq!(strategy.stage().name(), "tree-iqtree-bootstrap");
    }

    #[test]
    fn mafft_needs_no_extra_parameters() {
        let temp = tempdir().unwrap();
        let ctx = context(temp.path());
        let mut r = resolver(&["1", ""]);
        let strategy = TreeStrategy::select(&mut r, &ctx).unwrap();
        assert_eq!(strategy, TreeStrategy::MafftFasttree);
        assert_eq!(strategy.stage().parameters().len(), 1);
    }
}
