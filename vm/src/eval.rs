//! Formula evaluation: compile an expression, run it, and derive PoE and
//! MDL scores from the run.
//!
//! PoE favors short, cheap programs that produce non-trivial magnitudes;
//! MDL is a log-scaled program length, both in [0, 1].

use crate::compile::{compile_expression, CompileError};
use crate::machine::{Vm, VmLimits, VmResult, VmStatus};
use kolibri_fkv::Fkv;

const EVAL_MAX_STEPS: u32 = 256;
const EVAL_MAX_STACK: u32 = 64;

/// Outcome of evaluating one expression
#[derive(Clone, Copy, Debug)]
pub struct Evaluation {
    pub result: VmResult,
    pub poe: f64,
    pub mdl: f64,
    pub program_len: usize,
}

fn compute_poe(result: &VmResult, program_len: usize) -> f64 {
    if result.status != VmStatus::Ok || !result.halted {
        return 0.0;
    }
    let steps_penalty = 1.0 / (1.0 + f64::from(result.steps) / 16.0);
    let magnitude = (result.result.max(0) as f64).ln_1p();
    let magnitude_norm = magnitude / (magnitude + 4.0);
    let mut poe = (steps_penalty * magnitude_norm).clamp(0.0, 1.0);
    if program_len > 0 {
        let brevity_bonus = 1.0 / (1.0 + program_len as f64 / 32.0);
        poe = (poe * 0.7 + brevity_bonus * 0.3).min(1.0);
    }
    poe
}

fn compute_mdl(program_len: usize) -> f64 {
    if program_len == 0 {
        return 0.0;
    }
    let scaled = (program_len as f64).ln_1p();
    let denom = 512f64.ln_1p();
    (scaled / denom).min(1.0)
}

/// Compile and run `expression` against `fkv`, scoring the result.
pub fn evaluate_expression(
    vm: &mut Vm,
    expression: &str,
    fkv: Option<&Fkv>,
) -> Result<Evaluation, CompileError> {
    let code = compile_expression(expression)?;
    let limits = VmLimits::new(EVAL_MAX_STEPS, EVAL_MAX_STACK);
    let result = vm.run(&code, &limits, None, fkv);
    Ok(Evaluation {
        result,
        poe: compute_poe(&result, code.len()),
        mdl: compute_mdl(code.len()),
        program_len: code.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_run_scores_in_unit_interval() {
        let mut vm = Vm::new();
        let eval = evaluate_expression(&mut vm, "126*6", None).unwrap();
        assert_eq!(eval.result.result, 756);
        assert!(eval.poe > 0.0 && eval.poe <= 1.0);
        assert!(eval.mdl > 0.0 && eval.mdl <= 1.0);
        assert!(eval.program_len > 0);
    }

    #[test]
    fn test_failed_run_scores_zero_poe() {
        let mut vm = Vm::new();
        let eval = evaluate_expression(&mut vm, "5/0", None).unwrap();
        assert_eq!(eval.result.status, VmStatus::DivByZero);
        assert_eq!(eval.poe, 0.0);
        assert!(eval.mdl > 0.0);
    }

    #[test]
    fn test_shorter_program_gets_higher_poe() {
        let mut vm = Vm::new();
        let short = evaluate_expression(&mut vm, "9+9", None).unwrap();
        let long = evaluate_expression(&mut vm, "9999999+9999999", None).unwrap();
        assert!(short.poe > 0.0);
        assert!(long.mdl > short.mdl);
    }
}
