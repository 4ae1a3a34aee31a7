//! Symbolic operand stack used to recover control flow.
//!
//! The simulation does not evaluate anything. It only tracks which
//! instruction produced each slot, which is enough to find the two pushes a
//! `CALL` consumes besides its arguments and to give jump targets names.

use std::collections::{HashMap, HashSet};

use crate::error::{Diagnostics, Ed9Error, Position};
use crate::opcode::{Opcode, StackEffect};
use crate::program::render::render_tagged;
use crate::script::{Instruction, Operand, PushRole};
use crate::tagged::TaggedValue;

#[derive(Debug, Clone, PartialEq)]
pub enum StackSlot {
    /// Input argument of the function.
    Param(usize),
    /// Copy of the slot at this depth.
    Temp(usize),
    Imm(TaggedValue),
    /// Value computed by the instruction at this file offset.
    ExpressionResult(u32),
    /// Produced after a simulation error.
    Marker,
}

impl StackSlot {
    pub fn describe(&self) -> String {
        match self {
            StackSlot::Param(i) => format!("arg{}", i),
            StackSlot::Temp(i) => format!("stack[{}]", i),
            StackSlot::Imm(v) => render_tagged(v),
            StackSlot::ExpressionResult(at) => format!("expr_{:X}", at),
            StackSlot::Marker => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub value: StackSlot,
    /// Index of the producing instruction in the function.
    pub producer: Option<usize>,
}

/// Label names keyed by absolute file offset, handed out in first-reference
/// order.
#[derive(Debug, Default)]
pub struct Labels {
    by_addr: HashMap<u32, String>,
    next: usize,
}

impl Labels {
    pub fn name_for(&mut self, abs: u32) -> String {
        if let Some(name) = self.by_addr.get(&abs) {
            return name.clone();
        }
        let name = format!("Loc_{}", self.next);
        self.next += 1;
        self.by_addr.insert(abs, name.clone());
        name
    }

    pub fn get(&self, abs: u32) -> Option<&str> {
        self.by_addr.get(&abs).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

/// What the simulation needs to know about a call target.
#[derive(Debug, Clone)]
pub struct Callee {
    pub name: String,
    pub argc: usize,
}

pub struct Simulation<'a> {
    /// Absolute offset of the code section.
    pub code_base: u32,
    pub in_count: usize,
    pub callees: &'a [Callee],
    /// Absolute offsets a label may point at.
    pub targets: &'a HashSet<u32>,
}

struct State {
    stack: Vec<Slot>,
    snapshots: HashMap<u32, Vec<Slot>>,
}

impl State {
    fn push(&mut self, value: StackSlot, producer: usize) {
        self.stack.push(Slot {
            value,
            producer: Some(producer),
        });
    }

    fn pop(&mut self, n: usize, abs: u32, diags: &mut Diagnostics) {
        if self.stack.len() < n {
            diags.warn(Position::Offset(abs as u64), Ed9Error::StackUnderflow(abs));
            self.stack.clear();
        } else {
            self.stack.truncate(self.stack.len() - n);
        }
    }

    /// Depth addressed by a byte offset from the top of the stack.
    fn slot_index(&self, offset: i32) -> Option<usize> {
        let ix = self.stack.len() as i64 + (offset / 4) as i64;
        (0..self.stack.len() as i64).contains(&ix).then_some(ix as usize)
    }

    fn describe_top(&self, n: usize) -> Vec<String> {
        let from = self.stack.len().saturating_sub(n);
        self.stack[from..].iter().map(|s| s.value.describe()).collect()
    }

    /// `args: ...` for a call taking `argc` arguments, none when it takes none.
    fn args_note(&self, argc: usize) -> Option<String> {
        (argc > 0).then(|| format!("args: {}", self.describe_top(argc).join(", ")))
    }
}

fn is_undef_push(inst: &Instruction) -> bool {
    inst.opcode == Opcode::Push && matches!(inst.tagged(0), Some(TaggedValue::Undef(_)))
}

impl Simulation<'_> {
    /// Walk one function body, naming jump targets and promoting the pushes
    /// that feed each `CALL`.
    ///
    /// Returns one optional annotation per instruction describing the
    /// arguments of calls and commands.
    pub fn run(
        &self,
        instrs: &mut [Instruction],
        labels: &mut Labels,
        diags: &mut Diagnostics,
    ) -> Vec<Option<String>> {
        let mut notes = vec![None; instrs.len()];
        let mut st = State {
            stack: (0..self.in_count)
                .map(|i| Slot {
                    value: StackSlot::Param(i),
                    producer: None,
                })
                .collect(),
            snapshots: HashMap::new(),
        };
        let mut after_terminal = false;

        for i in 0..instrs.len() {
            let abs = self.code_base + instrs[i].addr;
            if after_terminal {
                if let Some(snap) = st.snapshots.get(&abs) {
                    st.stack = snap.clone();
                }
            }

            let opcode = instrs[i].opcode;
            match opcode.info().effect {
                StackEffect::Push => {
                    let value = instrs[i]
                        .tagged(0)
                        .cloned()
                        .map(StackSlot::Imm)
                        .unwrap_or(StackSlot::Marker);
                    st.push(value, i);
                }
                StackEffect::PopBytes => {
                    let n = instrs[i].u8_at(0).unwrap_or(0) as usize / 4;
                    st.pop(n, abs, diags);
                }
                StackEffect::PopCount => {
                    let n = instrs[i].u8_at(0).unwrap_or(0) as usize;
                    st.pop(n, abs, diags);
                }
                StackEffect::ReadSlot => {
                    let offset = instrs[i].i32_at(0).unwrap_or(0);
                    match st.slot_index(offset) {
                        Some(ix) => st.push(StackSlot::Temp(ix), i),
                        None => {
                            diags.warn(
                                Position::Offset(abs as u64),
                                Ed9Error::StackIndexOutOfRange {
                                    addr: abs,
                                    index: offset,
                                    depth: st.stack.len(),
                                },
                            );
                            st.push(StackSlot::Marker, i);
                        }
                    }
                }
                StackEffect::WriteSlot => {
                    let offset = instrs[i].i32_at(0).unwrap_or(0);
                    if st.slot_index(offset).is_none() {
                        diags.warn(
                            Position::Offset(abs as u64),
                            Ed9Error::StackIndexOutOfRange {
                                addr: abs,
                                index: offset,
                                depth: st.stack.len(),
                            },
                        );
                    }
                    st.pop(1, abs, diags);
                }
                StackEffect::Load => st.push(StackSlot::ExpressionResult(abs), i),
                StackEffect::Store => st.pop(1, abs, diags),
                StackEffect::Jump | StackEffect::CondJump => {
                    if opcode.info().effect == StackEffect::CondJump {
                        st.pop(1, abs, diags);
                    }
                    if let Some(target) = self.link(&mut instrs[i], abs, labels, diags) {
                        st.snapshots
                            .entry(target)
                            .or_insert_with(|| st.stack.clone());
                    }
                }
                StackEffect::Call => {
                    notes[i] = self.call(i, instrs, &mut st, labels, diags);
                }
                StackEffect::CrossCall => {
                    let argc = instrs[i].u8_at(2).unwrap_or(0) as usize;
                    notes[i] = st.args_note(argc);
                    st.pop(argc + 5, abs, diags);
                }
                StackEffect::CrossCallKeep => {
                    let argc = instrs[i].u8_at(2).unwrap_or(0) as usize;
                    notes[i] = st.args_note(argc);
                }
                StackEffect::LabelPush => {
                    let _ = self.link(&mut instrs[i], abs, labels, diags);
                    for _ in 0..5 {
                        st.push(StackSlot::ExpressionResult(abs), i);
                    }
                }
                StackEffect::Return => st.stack.clear(),
                StackEffect::BinOp => {
                    st.pop(2, abs, diags);
                    st.push(StackSlot::ExpressionResult(abs), i);
                }
                StackEffect::UnOp => {
                    st.pop(1, abs, diags);
                    st.push(StackSlot::ExpressionResult(abs), i);
                }
                StackEffect::RunCmd => {
                    let argc = instrs[i].u8_at(2).unwrap_or(0) as usize;
                    notes[i] = st.args_note(argc);
                }
                StackEffect::Misc => {}
            }

            after_terminal = matches!(opcode, Opcode::Jump | Opcode::Exit);
        }

        notes
    }

    /// Swap a valid absolute target for a label and return the target.
    fn link(
        &self,
        inst: &mut Instruction,
        abs: u32,
        labels: &mut Labels,
        diags: &mut Diagnostics,
    ) -> Option<u32> {
        let target = match inst.operands.first() {
            Some(Operand::Address(t)) => *t,
            _ => return None,
        };
        if self.targets.contains(&target) {
            inst.operands[0] = Operand::Label(labels.name_for(target));
            Some(target)
        } else {
            diags.warn(
                Position::Offset(abs as u64),
                Ed9Error::UnresolvedLabel(format!("0x{:X}", target)),
            );
            None
        }
    }

    fn call(
        &self,
        i: usize,
        instrs: &mut [Instruction],
        st: &mut State,
        labels: &mut Labels,
        diags: &mut Diagnostics,
    ) -> Option<String> {
        let abs = self.code_base + instrs[i].addr;
        let index = match instrs[i].operands.first() {
            Some(Operand::Function(ix)) => *ix as usize,
            _ => return None,
        };
        let callee = match self.callees.get(index) {
            Some(c) => c,
            None => {
                diags.warn(
                    Position::Offset(abs as u64),
                    Ed9Error::UnknownFunction(format!("#{}", index)),
                );
                st.pop(2, abs, diags);
                return None;
            }
        };

        let depth = st.stack.len();
        let argc = callee.argc;
        if depth < argc + 2 {
            diags.warn(Position::Offset(abs as u64), Ed9Error::StackUnderflow(abs));
            st.stack.clear();
            return Some(format!("{}(?)", callee.name));
        }
        let note = format!("{}({})", callee.name, st.describe_top(argc).join(", "));

        let ret = st.stack[depth - argc - 1].producer;
        let caller = st.stack[depth - argc - 2].producer;
        match ret {
            Some(j) if is_undef_push(&instrs[j]) => {
                let site = self.code_base + instrs[i].end();
                instrs[j].role = Some(PushRole::ReturnAddress);
                instrs[j].operands[0] = Operand::Label(labels.name_for(site));
            }
            _ => diags.warn(Position::Offset(abs as u64), Ed9Error::UnrecognizedCall(abs)),
        }
        if let Some(k) = caller {
            if is_undef_push(&instrs[k]) {
                instrs[k].role = Some(PushRole::CallerFunctionIndex);
            }
        }

        st.stack.truncate(depth - argc - 2);
        Some(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn push(addr: u32, v: TaggedValue) -> Instruction {
        Instruction::new(Opcode::Push, addr, vec![Operand::Tagged(v)])
    }

    #[test]
    fn call_promotes_caller_and_return_pushes() {
        let callees = vec![Callee {
            name: "callee".into(),
            argc: 1,
        }];
        let mut instrs = vec![
            push(0, TaggedValue::Undef(0)),
            push(5, TaggedValue::Undef(0)),
            push(10, TaggedValue::Int(42)),
            Instruction::new(Opcode::Call, 15, vec![Operand::Function(0)]),
            Instruction::new(Opcode::Exit, 18, vec![]),
        ];
        let targets: HashSet<u32> = instrs.iter().map(|i| 0x100 + i.addr).chain([0x100 + 19]).collect();
        let sim = Simulation {
            code_base: 0x100,
            in_count: 0,
            callees: &callees,
            targets: &targets,
        };
        let mut labels = Labels::default();
        let mut diags = Diagnostics::new();
        let notes = sim.run(&mut instrs, &mut labels, &mut diags);

        assert!(diags.is_empty());
        assert_eq!(instrs[0].role, Some(PushRole::CallerFunctionIndex));
        assert_eq!(instrs[1].role, Some(PushRole::ReturnAddress));
        assert_eq!(instrs[1].operands, vec![Operand::Label("Loc_0".into())]);
        assert_eq!(labels.get(0x100 + 18), Some("Loc_0"));
        assert_eq!(notes[3].as_deref(), Some("callee(INT(42))"));
    }

    #[test]
    fn jumps_are_named_in_reference_order() {
        let mut instrs = vec![
            Instruction::new(Opcode::Jump, 0, vec![Operand::Address(0x10A)]),
            Instruction::new(Opcode::Jump, 5, vec![Operand::Address(0x10B)]),
            Instruction::new(Opcode::Exit, 10, vec![]),
            Instruction::new(Opcode::Exit, 11, vec![]),
        ];
        let targets: HashSet<u32> = [0x100, 0x105, 0x10A, 0x10B, 0x10C].into_iter().collect();
        let sim = Simulation {
            code_base: 0x100,
            in_count: 0,
            callees: &[],
            targets: &targets,
        };
        let mut labels = Labels::default();
        let mut diags = Diagnostics::new();
        sim.run(&mut instrs, &mut labels, &mut diags);
        assert_eq!(instrs[0].operands, vec![Operand::Label("Loc_0".into())]);
        assert_eq!(instrs[1].operands, vec![Operand::Label("Loc_1".into())]);
    }

    #[test]
    fn argument_notes_only_when_there_are_arguments() {
        let mut instrs = vec![
            Instruction::new(Opcode::PushReturnAddressXScript, 0, vec![Operand::Address(0x10F)]),
            Instruction::new(
                Opcode::CallFromOtherScript,
                5,
                vec![
                    Operand::Tagged(TaggedValue::Str("ev".into())),
                    Operand::Tagged(TaggedValue::Str("talk".into())),
                    Operand::U8(0),
                ],
            ),
            push(15, TaggedValue::Int(1)),
            Instruction::new(Opcode::RunCmd, 20, vec![Operand::U8(1), Operand::U8(0), Operand::U8(1)]),
            Instruction::new(Opcode::Exit, 24, vec![]),
        ];
        let targets: HashSet<u32> = instrs.iter().map(|i| 0x100 + i.addr).chain([0x100 + 25]).collect();
        let sim = Simulation {
            code_base: 0x100,
            in_count: 0,
            callees: &[],
            targets: &targets,
        };
        let mut labels = Labels::default();
        let mut diags = Diagnostics::new();
        let notes = sim.run(&mut instrs, &mut labels, &mut diags);

        assert!(diags.is_empty());
        assert_eq!(instrs[0].operands, vec![Operand::Label("Loc_0".into())]);
        assert_eq!(notes[1], None);
        assert_eq!(notes[3].as_deref(), Some("args: INT(1)"));
    }

    #[test]
    fn problems_are_warnings() {
        let mut instrs = vec![
            Instruction::new(Opcode::Pop, 0, vec![Operand::U8(8)]),
            Instruction::new(Opcode::RetrieveAtIndex, 2, vec![Operand::I32(-16)]),
            Instruction::new(Opcode::Jump, 7, vec![Operand::Address(0xFFFF)]),
        ];
        let targets = HashSet::new();
        let sim = Simulation {
            code_base: 0,
            in_count: 1,
            callees: &[],
            targets: &targets,
        };
        let mut labels = Labels::default();
        let mut diags = Diagnostics::new();
        sim.run(&mut instrs, &mut labels, &mut diags);
        let kinds: Vec<&str> = diags.iter().map(|d| d.error.category()).collect();
        assert_eq!(kinds, vec!["StackUnderflow", "StackIndexOutOfRange", "UnresolvedLabel"]);
        assert!(!diags.has_errors());
        assert_eq!(instrs[2].operands, vec![Operand::Address(0xFFFF)]);
        assert!(labels.is_empty());
    }
}
