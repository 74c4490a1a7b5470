// The interpreter loop

use kolibri_core::clock;
use kolibri_fkv::{EntryType, Fkv};

const CALL_STACK_MAX: usize = 32;
const DEFAULT_MAX_STEPS: u32 = 1024;
const DEFAULT_MAX_STACK: u32 = 128;
const MOD10: u64 = 10_000_000_000;

// Opcodes
const OP_PUSH: u8 = 0x01;
const OP_ADD: u8 = 0x02;
const OP_SUB: u8 = 0x03;
const OP_MUL: u8 = 0x04;
const OP_DIV: u8 = 0x05;
const OP_MOD: u8 = 0x06;
const OP_CMP: u8 = 0x07;
const OP_JZ: u8 = 0x08;
const OP_JNZ: u8 = 0x09;
const OP_CALL: u8 = 0x0A;
const OP_RET: u8 = 0x0B;
const OP_READ_FKV: u8 = 0x0C;
const OP_WRITE_FKV: u8 = 0x0D;
const OP_HASH10: u8 = 0x0E;
const OP_RANDOM10: u8 = 0x0F;
const OP_TIME10: u8 = 0x10;
const OP_NOP: u8 = 0x11;
const OP_HALT: u8 = 0x12;

/// Why the interpreter stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmStatus {
    Ok,
    InvalidOpcode,
    StackOverflow,
    StackUnderflow,
    DivByZero,
    GasExhausted,
}

/// Per-invocation bounds
#[derive(Clone, Copy, Debug)]
pub struct VmLimits {
    pub max_steps: u32,
    pub max_stack: u32,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            max_steps: DEFAULT_MAX_STEPS,
            max_stack: DEFAULT_MAX_STACK,
        }
    }
}

impl VmLimits {
    pub fn new(max_steps: u32, max_stack: u32) -> Self {
        VmLimits {
            max_steps: if max_steps == 0 {
                DEFAULT_MAX_STEPS
            } else {
                max_steps
            },
            max_stack: if max_stack == 0 {
                DEFAULT_MAX_STACK
            } else {
                max_stack
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub step: u32,
    pub ip: u32,
    pub opcode: u8,
    pub stack_top: i64,
    pub gas_left: u32,
}

/// Fixed-capacity execution trace; instructions beyond the capacity run
/// without being recorded.
#[derive(Clone, Debug)]
pub struct Trace {
    capacity: usize,
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Trace {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn record(&mut self, entry: TraceEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Outcome of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmResult {
    pub status: VmStatus,
    pub steps: u32,
    pub result: i64,
    pub halted: bool,
}

/// The virtual machine. Holds only the RANDOM10 LCG state; all run state
/// is per-invocation.
pub struct Vm {
    lcg_state: u32,
}

impl Vm {
    pub fn new() -> Self {
        Vm { lcg_state: 1337 }
    }

    /// Seed the RANDOM10 generator. Identical seeds give identical
    /// sequences on every host.
    pub fn set_seed(&mut self, seed: u32) {
        self.lcg_state = seed;
    }

    fn next_random10(&mut self) -> u64 {
        self.lcg_state = self
            .lcg_state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        u64::from(self.lcg_state) % MOD10
    }

    /// Execute `code` under `limits`, optionally tracing, with the bridge
    /// opcodes bound to `fkv` (an absent store reads as empty).
    pub fn run(
        &mut self,
        code: &[u8],
        limits: &VmLimits,
        mut trace: Option<&mut Trace>,
        fkv: Option<&Fkv>,
    ) -> VmResult {
        let max_steps = if limits.max_steps == 0 {
            DEFAULT_MAX_STEPS
        } else {
            limits.max_steps
        };
        let max_stack = if limits.max_stack == 0 {
            DEFAULT_MAX_STACK
        } else {
            limits.max_stack
        } as usize;

        if let Some(trace) = trace.as_deref_mut() {
            trace.clear();
        }

        let mut stack: Vec<i64> = Vec::with_capacity(max_stack.min(1024));
        let mut call_stack: Vec<u32> = Vec::with_capacity(CALL_STACK_MAX);
        let mut ip: u32 = 0;
        let mut steps: u32 = 0;
        let mut status = VmStatus::Ok;
        let mut halted = false;
        let len = code.len() as u32;

        macro_rules! push {
            ($value:expr) => {
                if stack.len() >= max_stack {
                    status = VmStatus::StackOverflow;
                    break;
                } else {
                    stack.push($value);
                }
            };
        }
        macro_rules! pop2 {
            () => {
                match (stack.pop(), stack.pop()) {
                    (Some(b), Some(a)) => (a, b),
                    _ => {
                        status = VmStatus::StackUnderflow;
                        break;
                    }
                }
            };
        }
        macro_rules! pop1 {
            () => {
                match stack.pop() {
                    Some(v) => v,
                    None => {
                        status = VmStatus::StackUnderflow;
                        break;
                    }
                }
            };
        }

        while ip < len {
            if steps >= max_steps {
                status = VmStatus::GasExhausted;
                break;
            }
            let opcode = code[ip as usize];
            ip += 1;
            if let Some(trace) = trace.as_deref_mut() {
                trace.record(TraceEntry {
                    step: steps,
                    ip: ip - 1,
                    opcode,
                    stack_top: stack.last().copied().unwrap_or(0),
                    gas_left: max_steps - steps,
                });
            }
            steps += 1;

            match opcode {
                OP_PUSH => {
                    if ip >= len {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    let digit = code[ip as usize];
                    ip += 1;
                    push!(i64::from(digit));
                }
                OP_ADD => {
                    let (a, b) = pop2!();
                    push!(a.wrapping_add(b));
                }
                OP_SUB => {
                    let (a, b) = pop2!();
                    push!(a.wrapping_sub(b));
                }
                OP_MUL => {
                    let (a, b) = pop2!();
                    push!(a.wrapping_mul(b));
                }
                OP_DIV => {
                    let (a, b) = pop2!();
                    if b == 0 {
                        status = VmStatus::DivByZero;
                        break;
                    }
                    push!(a.wrapping_div(b));
                }
                OP_MOD => {
                    let (a, b) = pop2!();
                    if b == 0 {
                        status = VmStatus::DivByZero;
                        break;
                    }
                    push!(a.wrapping_rem(b));
                }
                OP_CMP => {
                    let (a, b) = pop2!();
                    push!(match a.cmp(&b) {
                        std::cmp::Ordering::Less => -1,
                        std::cmp::Ordering::Equal => 0,
                        std::cmp::Ordering::Greater => 1,
                    });
                }
                OP_JZ | OP_JNZ => {
                    if ip + 1 >= len {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    let rel =
                        u16::from(code[ip as usize]) | (u16::from(code[ip as usize + 1]) << 8);
                    ip += 2;
                    let offset = rel as i16;
                    let value = pop1!();
                    let jump = (opcode == OP_JZ && value == 0) || (opcode == OP_JNZ && value != 0);
                    if jump {
                        let target = i64::from(ip) + i64::from(offset);
                        if target < 0 || target > i64::from(len) {
                            status = VmStatus::InvalidOpcode;
                            break;
                        }
                        ip = target as u32;
                    }
                }
                OP_CALL => {
                    if ip + 1 >= len {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    if call_stack.len() >= CALL_STACK_MAX {
                        status = VmStatus::StackOverflow;
                        break;
                    }
                    let addr =
                        u16::from(code[ip as usize]) | (u16::from(code[ip as usize + 1]) << 8);
                    ip += 2;
                    call_stack.push(ip);
                    if u32::from(addr) >= len {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    ip = u32::from(addr);
                }
                OP_RET => match call_stack.pop() {
                    Some(return_ip) => ip = return_ip,
                    None => break, // normal termination
                },
                OP_READ_FKV => {
                    let key_num = pop1!();
                    if key_num < 0 {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    let key = number_to_digits(key_num as u64);
                    let hit = fkv
                        .and_then(|fkv| fkv.get_prefix(&key, 1).ok())
                        .and_then(|entries| entries.into_iter().next());
                    match hit {
                        Some(entry) => {
                            let mut value: u64 = 0;
                            for &digit in &entry.value {
                                value = value.wrapping_mul(10).wrapping_add(u64::from(digit));
                            }
                            push!(value as i64);
                        }
                        None => push!(0),
                    }
                }
                OP_WRITE_FKV => {
                    let (key_num, value_num) = pop2!();
                    if key_num < 0 || value_num < 0 {
                        status = VmStatus::InvalidOpcode;
                        break;
                    }
                    if let Some(fkv) = fkv {
                        let key = number_to_digits(key_num as u64);
                        let value = number_to_digits(value_num as u64);
                        let _ = fkv.put(&key, &value, EntryType::Value);
                    }
                }
                OP_HASH10 => {
                    let value = pop1!();
                    let hash = (value as u64).wrapping_mul(2_654_435_761) % MOD10;
                    push!(hash as i64);
                }
                OP_RANDOM10 => {
                    let random = self.next_random10();
                    push!(random as i64);
                }
                OP_TIME10 => {
                    let now = clock::now_wall_ms();
                    push!(now as i64);
                }
                OP_NOP => {}
                OP_HALT => {
                    halted = true;
                    break;
                }
                _ => {
                    status = VmStatus::InvalidOpcode;
                    break;
                }
            }
        }

        VmResult {
            status,
            steps,
            result: stack.last().copied().unwrap_or(0),
            halted,
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Decimal digits of `value`, most significant first (`0` → `[0]`).
fn number_to_digits(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let mut digits = Vec::with_capacity(20);
    let mut v = value;
    while v > 0 {
        digits.push((v % 10) as u8);
        v /= 10;
    }
    digits.reverse();
    digits
}
