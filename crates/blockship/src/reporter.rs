//! Progress reporting sink used by every pipeline step.

use anyhow::Result;

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);

    /// Tool output and other detail; dropped unless the sink is verbose.
    fn debug(&mut self, _msg: &str) {}

    /// Reports a precondition and hands the result back.
    fn check(&mut self, label: &str, ok: bool) -> bool {
        if ok {
            self.info(&format!("{label}: ok"));
        } else {
            self.error(&format!("{label}: failed"));
        }
        ok
    }

    fn step_started(&mut self, label: &str) {
        self.info(&format!("{label}..."));
    }

    fn step_finished(&mut self, label: &str, ok: bool) {
        if !ok {
            self.error(&format!("{label}: failed"));
        }
    }
}

/// Runs `f` as a named step, reporting its start and outcome.
pub fn progress<T>(
    reporter: &mut dyn Reporter,
    label: &str,
    f: impl FnOnce(&mut dyn Reporter) -> Result<T>,
) -> Result<T> {
    reporter.step_started(label);
    let result = f(&mut *reporter);
    reporter.step_finished(label, result.is_ok());
    result
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
    fn check(&mut self, _label: &str, ok: bool) -> bool {
        ok
    }
    fn step_started(&mut self, _label: &str) {}
    fn step_finished(&mut self, _label: &str, _ok: bool) {}
}
