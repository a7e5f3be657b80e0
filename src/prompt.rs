use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::validation::{Validator, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Line(String),
    TimedOut,
}

pub trait Console {
    fn show(&mut self, message: &str);
    fn read_reply(&mut self, timeout: Option<Duration>) -> PipelineResult<Reply>;
}

/// Terminal console. Stdin is read on a helper thread so a prompt can stop
/// waiting after `timeout` while the read itself stays pending for the next
/// prompt.
pub struct TerminalConsole {
    lines: Receiver<Option<String>>,
}

impl TerminalConsole {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut handle = stdin.lock();
            loop {
                let mut line = String::new();
                match handle.read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(None);
                        break;
                    }
                    Ok(_) => {
                        if tx.send(Some(line)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { lines: rx }
    }
}

impl Console for TerminalConsole {
    fn show(&mut self, message: &str) {
        print!("{message}");
        if !message.ends_with(' ') {
            println!();
        }
        let _ = io::stdout().flush();
    }

    fn read_reply(&mut self, timeout: Option<Duration>) -> PipelineResult<Reply> {
        let received = match timeout {
            Some(limit) => match self.lines.recv_timeout(limit) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    println!();
                    return Ok(Reply::TimedOut);
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.lines.recv().ok().flatten(),
        };
        match received {
            Some(line) => Ok(Reply::Line(line.trim_end_matches(['\r', '\n']).to_string())),
            None => Err(PipelineError::InputClosed),
        }
    }
}

/// Console fed from a fixed list of answers. Running out of answers is
/// reported as [`PipelineError::InputClosed`].
#[derive(Default)]
pub struct ScriptedConsole {
    replies: VecDeque<Reply>,
    transcript: Rc<RefCell<Vec<String>>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: answers.into_iter().map(|a| Reply::Line(a.into())).collect(),
            transcript: Rc::default(),
        }
    }

    pub fn push_answer(&mut self, answer: impl Into<String>) -> &mut Self {
        self.replies.push_back(Reply::Line(answer.into()));
        self
    }

    pub fn push_timeout(&mut self) -> &mut Self {
        self.replies.push_back(Reply::TimedOut);
        self
    }

    /// Shared handle on everything shown so far; stays valid after the
    /// console is moved into a resolver.
    pub fn transcript(&self) -> Rc<RefCell<Vec<String>>> {
        self.transcript.clone()
    }
}

impl Console for ScriptedConsole {
    fn show(&mut self, message: &str) {
        self.transcript.borrow_mut().push(message.to_string());
    }

    fn read_reply(&mut self, _timeout: Option<Duration>) -> PipelineResult<Reply> {
        self.replies.pop_front().ok_or(PipelineError::InputClosed)
    }
}

/// A value the user is asked for at one stage.
pub struct StageParameter {
    pub name: &'static str,
    pub prompt: String,
    pub default: String,
    validator: Validator,
    resolved: Option<String>,
}

impl fmt::Debug for StageParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageParameter")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl StageParameter {
    pub fn new(name: &'static str, prompt: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name,
            prompt: prompt.into(),
            default: default.into(),
            validator: Box::new(|_| Verdict::Accept),
            resolved: None,
        }
    }

    pub fn validate_with(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn check(&self, candidate: &str) -> Verdict {
        (self.validator)(candidate)
    }

    pub fn value(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    pub fn parse<T: FromStr>(&self) -> PipelineResult<T> {
        let raw = self.value().ok_or_else(|| PipelineError::Validation {
            parameter: self.name.to_string(),
            reason: "value was never resolved".into(),
        })?;
        raw.parse().map_err(|_| PipelineError::Validation {
            parameter: self.name.to_string(),
            reason: format!("'{raw}' cannot be parsed"),
        })
    }
}

pub struct Resolver {
    console: Box<dyn Console>,
    timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(console: Box<dyn Console>, timeout: Option<Duration>) -> Self {
        Self { console, timeout }
    }

    pub fn note(&mut self, message: &str) {
        self.console.show(message);
    }

    /// Solicits `param` until a value passes validation and the user confirms
    /// it. There is no retry limit.
    pub fn resolve(&mut self, param: &mut StageParameter) -> PipelineResult<String> {
        loop {
            let prompt = format!("{} [{}]: ", param.prompt, param.default);
            self.console.show(&prompt);
            let candidate = match self.console.read_reply(self.timeout)? {
                Reply::Line(line) if !line.trim().is_empty() => line.trim().to_string(),
                Reply::Line(_) => param.default.clone(),
                Reply::TimedOut => {
                    self.console
                        .show(&format!("No response; using default '{}'", param.default));
                    param.default.clone()
                }
            };

            match param.check(&candidate) {
                Verdict::Reject(reason) => {
                    warn!(parameter = param.name, value = %candidate, "{reason}");
                    self.console
                        .show(&format!("Invalid value '{candidate}': {reason}"));
                    continue;
                }
                Verdict::Warn(reason) => {
                    warn!(parameter = param.name, value = %candidate, "{reason}");
                    self.console.show(&format!("Warning: {reason}"));
                }
                Verdict::Accept => {}
            }

            if self.ask(&format!("{} = {candidate}. Is this correct?", param.name), true)? {
                debug!(parameter = param.name, value = %candidate, "Parameter resolved");
                param.resolved = Some(candidate.clone());
                return Ok(candidate);
            }
        }
    }

    /// Yes/no question; empty input or a timeout answers `default`.
    pub fn ask(&mut self, question: &str, default: bool) -> PipelineResult<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            self.console.show(&format!("{question} {hint} "));
            let answer = match self.console.read_reply(self.timeout)? {
                Reply::TimedOut => return Ok(default),
                Reply::Line(line) => line.trim().to_ascii_lowercase(),
            };
            match answer.as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.console.show("Please answer 'y' or 'n'."),
            }
        }
    }

    /// Named abort point: a "no" ends the run.
    pub fn checkpoint(&mut self, checkpoint: &'static str, question: &str) -> PipelineResult<()> {
        if self.ask(question, true)? {
            Ok(())
        } else {
            Err(PipelineError::Aborted { checkpoint })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::truncation_length;

    fn resolver(console: ScriptedConsole) -> Resolver {
        Resolver::new(Box::new(console), None)
    }

    #[test]
    fn empty_answer_takes_default() {
        let mut r = resolver(ScriptedConsole::new(["", ""]));
        let mut param = StageParameter::new("threads", "Number of threads", "4");
        assert_eq!(r.resolve(&mut param).unwrap(), "4");
        assert_eq!(param.parse::<u32>().unwrap(), 4);
    }

    #[test]
    fn timeout_takes_default_and_confirms() {
        let mut console = ScriptedConsole::default();
        console.push_timeout().push_timeout();
        let transcript = console.transcript();
        let mut r = resolver(console);
        let mut param = StageParameter::new("threads", "Number of threads", "8");
        assert_eq!(r.resolve(&mut param).unwrap(), "8");
        assert!(
            transcript
                .borrow()
                .iter()
                .any(|line| line.contains("No response"))
        );
    }

    #[test]
    fn rejection_loops_back_to_solicitation() {
        let mut r = resolver(ScriptedConsole::new(["n", "12", "y"]));
        let mut param = StageParameter::new("threads", "Number of threads", "4")
            .validate_with(Box::new(|v: &str| match v.parse::<u32>() {
                Ok(_) => Verdict::Accept,
                Err(_) => Verdict::Reject("not a number".into()),
            }));
        assert_eq!(r.resolve(&mut param).unwrap(), "12");
    }

    #[test]
    fn declining_confirmation_re_asks() {
        let mut r = resolver(ScriptedConsole::new(["10", "n", "20", "y"]));
        let mut param = StageParameter::new("depth", "Depth", "5");
        assert_eq!(r.resolve(&mut param).unwrap(), "20");
    }

    #[test]
    fn advisory_warning_does_not_block() {
        let console = ScriptedConsole::new(["9999", "y"]);
        let transcript = console.transcript();
        let mut r = resolver(console);
        let mut param = StageParameter::new("trunc_len_f", "Forward truncation length", "275")
            .validate_with(Box::new(truncation_length));
        assert_eq!(r.resolve(&mut param).unwrap(), "9999");
        assert!(
            transcript
                .borrow()
                .iter()
                .any(|line| line.starts_with("Warning:"))
        );
    }

    #[test]
    fn exhausted_script_reports_closed_input() {
        let mut r = resolver(ScriptedConsole::new(["abc"]));
        let mut param = StageParameter::new("depth", "Depth", "x")
            .validate_with(Box::new(|_| Verdict::Reject("never valid".into())));
        assert!(matches!(
            r.resolve(&mut param),
            Err(PipelineError::InputClosed)
        ));
    }

    #[test]
    fn checkpoint_no_aborts() {
        let mut r = resolver(ScriptedConsole::new(["maybe", "n"]));
        let err = r.checkpoint("before-trim", "Continue?").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Aborted {
                checkpoint: "before-trim"
            }
        ));
    }
}
