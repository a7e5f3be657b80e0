use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ampliflow::config::PilotConfig;
use ampliflow::error::{PipelineError, PipelineResult, PreconditionFailure};
use ampliflow::invoke::{ToolInvocation, ToolRunner};
use ampliflow::layout::{ProjectLayout, TAXONOMY_HEADER};
use ampliflow::pipeline::Workflow;
use ampliflow::prompt::{Resolver, ScriptedConsole};
use ampliflow::record::RunStatus;
use ampliflow::sequencer::{Session, run_workflow};
use tempfile::tempdir;

/// Stands in for the toolkit: records every command line and creates the
/// declared outputs, or exits 1 for one chosen stage.
struct RecordingRunner {
    commands: Rc<RefCell<Vec<String>>>,
    fail_on: Option<&'static str>,
}

impl ToolRunner for RecordingRunner {
    fn run(
        &mut self,
        stage: &'static str,
        invocation: &ToolInvocation,
        _log_path: &Path,
    ) -> PipelineResult<Option<i32>> {
        self.commands.borrow_mut().push(invocation.command_line());
        if self.fail_on == Some(stage) {
            return Ok(Some(1));
        }
        for output in &invocation.outputs {
            fs::create_dir_all(output.parent().unwrap()).unwrap();
            fs::write(output, b"").unwrap();
        }
        Ok(Some(0))
    }
}

const CLASSIFIER: &str = "data/interim/classifiers/silva-138-99-515-806/classifier.qza";

fn project() -> tempfile::TempDir {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("data/raw/fastq-reads")).unwrap();
    fs::write(root.join("data/raw/fastq-reads/S1_S1_L001_R1_001.fastq.gz"), b"").unwrap();
    fs::write(root.join("data/raw/fastq-reads/S1_S1_L001_R2_001.fastq.gz"), b"").unwrap();
    fs::write(root.join("data/metadata.tsv"), "sample-id\tgroup\nS1\tA\n").unwrap();
    fs::write(root.join("data/raw/sepp-refs-gg-13-8.qza"), b"").unwrap();
    fs::create_dir_all(root.join(CLASSIFIER).parent().unwrap()).unwrap();
    fs::write(root.join(CLASSIFIER), b"").unwrap();
    temp
}

fn session(
    root: &Path,
    console: ScriptedConsole,
    fail_on: Option<&'static str>,
) -> (Session, Rc<RefCell<Vec<String>>>) {
    let commands = Rc::new(RefCell::new(Vec::new()));
    let runner = RecordingRunner {
        commands: commands.clone(),
        fail_on,
    };
    let config = PilotConfig {
        require_environment: false,
        ..PilotConfig::default()
    };
    let session = Session::new(
        Workflow::Dataset,
        ProjectLayout::new(root),
        config,
        Resolver::new(Box::new(console), None),
        Box::new(runner),
    );
    (session, commands)
}

fn answers(list: &[&str]) -> ScriptedConsole {
    ScriptedConsole::new(list.iter().copied())
}

/// Accepts every default of a full dataset build: metadata, threads,
/// trimming, denoising, fragment insertion, classification, rarefaction and
/// export.
fn all_defaults() -> Vec<&'static str> {
    vec![""; 29]
}

fn ran(commands: &Rc<RefCell<Vec<String>>>, needle: &str) -> bool {
    commands.borrow().iter().any(|c| c.contains(needle))
}

fn run_records(root: &Path) -> Vec<PathBuf> {
    fs::read_dir(root.join("logs"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
        .collect()
}

#[test]
fn defaults_run_every_stage_and_export() {
    let temp = project();
    let root = temp.path();
    let (session, commands) = session(root, answers(&all_defaults()), None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        outcome.visited,
        vec![
            "precheck",
            "import",
            "trim",
            "denoise",
            "tree-build",
            "classify",
            "rarefy",
            "export",
            "done"
        ]
    );
    assert!(ran(&commands, "fragment-insertion sepp"));
    assert!(ran(&commands, "--p-trunc-len-f 275"));
    assert!(ran(&commands, "--p-front-f GTGYCAGCMGCCGCGGTAA"));
    assert!(ran(&commands, "biom convert"));

    let interim = root.join("data/interim");
    assert!(interim.join("tree-fragment-insertion-sepp/insertion-tree.qza").is_file());
    assert!(interim.join("silva-138-99-515-806-taxonomy/taxonomy.qza").is_file());
    assert!(interim.join("exported/table-with-taxonomy.tsv").is_file());
    assert_eq!(
        fs::read_to_string(interim.join("exported/biom-taxonomy.tsv")).unwrap(),
        format!("{TAXONOMY_HEADER}\n")
    );

    // The filtered table from fragment insertion feeds everything downstream.
    let rarefy = commands
        .borrow()
        .iter()
        .find(|c| c.contains("alpha-rarefaction"))
        .cloned()
        .unwrap();
    assert!(rarefy.contains("filtered-table.qza"));

    let record_path = outcome.record_path.unwrap();
    let record = fs::read_to_string(record_path).unwrap();
    assert!(record.contains("status: completed"));
    assert!(record.contains("tree_strategy: fragment-insertion-sepp"));
}

#[test]
fn iqtree_strategy_produces_no_other_strategy_outputs() {
    let temp = project();
    let root = temp.path();
    let mut script = vec![""; 19];
    script.extend(["2", "", "", ""]);
    script.extend(vec![""; 6]);
    let (session, commands) = session(root, answers(&script), None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let interim = root.join("data/interim");
    assert!(interim.join("tree-iqtree-bootstrap/rooted-tree.qza").is_file());
    assert!(!interim.join("tree-mafft-fasttree").exists());
    assert!(!interim.join("tree-fragment-insertion-sepp").exists());
    assert!(ran(&commands, "--p-bootstrap-replicates 1000"));
    assert!(ran(&commands, "phylogeny midpoint-root"));
    assert!(!ran(&commands, "fragment-insertion"));
    assert!(!ran(&commands, "align-to-tree-mafft-fasttree"));
}

#[test]
fn mafft_strategy_feeds_its_rooted_tree_to_rarefaction() {
    let temp = project();
    let root = temp.path();
    let mut script = vec![""; 19];
    script.extend(["1", ""]);
    script.extend(vec![""; 6]);
    let (session, commands) = session(root, answers(&script), None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let interim = root.join("data/interim");
    let rooted = interim.join("tree-mafft-fasttree/rooted-tree.qza");
    assert!(rooted.is_file());
    assert!(interim.join("tree-mafft-fasttree/masked-aligned-rep-seqs.qza").is_file());
    assert!(!interim.join("tree-iqtree-bootstrap").exists());
    assert!(!interim.join("tree-fragment-insertion-sepp").exists());
    assert!(ran(&commands, "phylogeny align-to-tree-mafft-fasttree"));
    assert!(!ran(&commands, "fragment-insertion"));
    assert!(!ran(&commands, "iqtree"));

    let rarefy = commands
        .borrow()
        .iter()
        .find(|c| c.contains("alpha-rarefaction"))
        .cloned()
        .unwrap();
    assert!(rarefy.contains(rooted.to_str().unwrap()));
    assert!(!rarefy.contains("filtered-table.qza"));

    let record = fs::read_to_string(outcome.record_path.unwrap()).unwrap();
    assert!(record.contains("tree_strategy: mafft-fasttree"));
}

#[test]
fn tool_failure_halts_before_the_next_stage() {
    let temp = project();
    let root = temp.path();
    let (session, commands) = session(root, answers(&[""; 18]), Some("denoise"));

    let err = run_workflow(session).unwrap_err();

    match err {
        PipelineError::ToolFailed { stage, code, .. } => {
            assert_eq!(stage, "denoise");
            assert_eq!(code, Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(
        commands
            .borrow()
            .last()
            .unwrap()
            .contains("dada2 denoise-paired")
    );
    let interim = root.join("data/interim");
    assert!(!interim.join("dada2/table.qza").exists());
    assert!(!interim.join("tree-fragment-insertion-sepp").exists());
    assert!(!interim.join("silva-138-99-515-806-taxonomy").exists());
    assert!(!interim.join("rarefaction").exists());

    let records = run_records(root);
    assert_eq!(records.len(), 1);
    let record = fs::read_to_string(&records[0]).unwrap();
    assert!(record.contains("status: failed"));
    assert!(record.contains("failure:"));
}

#[test]
fn missing_metadata_is_reported_and_asked_again() {
    let temp = project();
    let root = temp.path();
    fs::remove_file(root.join("data/metadata.tsv")).unwrap();
    let alternative = root.join("data/samples.tsv");
    fs::write(&alternative, "#SampleID\tsite\nS1\tgut\n").unwrap();

    let console = answers(&["", alternative.to_str().unwrap(), "y", "", "", "n"]);
    let transcript = console.transcript();
    let (session, commands) = session(root, console, None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.checkpoint, Some("before-trim"));
    assert_eq!(outcome.visited.last(), Some(&"aborted"));
    assert!(
        transcript
            .borrow()
            .iter()
            .any(|line| line.starts_with("Invalid value") && line.contains("metadata.tsv"))
    );
    assert!(ran(&commands, "tools import"));
    assert!(!ran(&commands, "cutadapt"));
    assert!(root.join("data/interim/demux/demux-paired-end.qzv").is_file());
}

#[test]
fn out_of_range_truncation_warns_and_is_used() {
    let temp = project();
    let root = temp.path();
    let mut script = vec![""; 14];
    script.extend(["9999", "y", "", "", "n"]);
    let console = answers(&script);
    let transcript = console.transcript();
    let (session, commands) = session(root, console, None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.checkpoint, Some("before-tree"));
    assert!(ran(&commands, "--p-trunc-len-f 9999"));
    assert!(ran(&commands, "--p-trunc-len-r 250"));
    assert!(
        transcript
            .borrow()
            .iter()
            .any(|line| line.starts_with("Warning:") && line.contains("9999"))
    );
}

#[test]
fn declining_export_is_a_skip() {
    let temp = project();
    let root = temp.path();
    let mut script = vec![""; 28];
    script.push("n");
    let (session, commands) = session(root, answers(&script), None);

    let outcome = run_workflow(session).unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.checkpoint, None);
    assert!(!ran(&commands, "tools export"));
    assert!(!root.join("data/interim/exported").exists());
}

#[test]
fn run_outside_a_project_fails_before_any_tool() {
    let temp = tempdir().unwrap();
    let (session, commands) = session(temp.path(), answers(&[]), None);

    let err = run_workflow(session).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Precondition(PreconditionFailure::WrongWorkingDirectory { .. })
    ));
    assert!(commands.borrow().is_empty());
    assert!(!temp.path().join("logs").exists());
}
