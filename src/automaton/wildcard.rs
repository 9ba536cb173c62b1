//! Wildcard automaton: `*` matches zero or more bytes, `?` matches exactly
//! one, every other byte is literal.
//!
//! Construction builds an NFA by a linear scan of the pattern, then
//! determinizes it via subset construction with ε-closure. The DFA state
//! count is bounded; exceeding the bound fails construction.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, ScourError};

use super::{Automaton, State, DEAD_STATE};

/// Maximum wildcard pattern length in bytes.
pub const MAX_WILDCARD_PATTERN_LEN: usize = 256;

/// Maximum number of DFA states produced by subset construction.
pub const MAX_DFA_STATES: usize = 10_000;

/// Compiled wildcard DFA. State 0 is dead, state 1 is the start.
#[derive(Clone, Debug)]
pub struct WildcardAutomaton {
    /// transitions[state][byte] = next state
    transitions: Vec<[State; 256]>,
    accepting: Vec<bool>,
}

impl WildcardAutomaton {
    pub fn new(pattern: &[u8]) -> Result<Self> {
        if pattern.len() > MAX_WILDCARD_PATTERN_LEN {
            return Err(ScourError::WildcardPatternTooLong(MAX_WILDCARD_PATTERN_LEN));
        }
        let nfa = Nfa::from_pattern(pattern);
        nfa.determinize()
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }
}

impl Automaton for WildcardAutomaton {
    fn start(&self) -> State {
        1
    }

    fn step(&self, state: State, byte: u8) -> State {
        match self.transitions.get(state as usize) {
            Some(row) if state != DEAD_STATE => row[byte as usize],
            _ => DEAD_STATE,
        }
    }

    fn is_accept(&self, state: State) -> bool {
        state != DEAD_STATE && self.accepting.get(state as usize).copied().unwrap_or(false)
    }

    fn can_match(&self, state: State) -> bool {
        state != DEAD_STATE
    }
}

/// NFA built from the pattern. Any-byte edges are kept separate from
/// literal edges so `?` and the `*` self-loop need no 256-way fan-out.
struct NfaState {
    byte_edges: HashMap<u8, Vec<usize>>,
    any_edges: Vec<usize>,
    epsilon: Vec<usize>,
    accepting: bool,
}

impl NfaState {
    fn new() -> Self {
        Self {
            byte_edges: HashMap::new(),
            any_edges: Vec::new(),
            epsilon: Vec::new(),
            accepting: false,
        }
    }
}

struct Nfa {
    states: Vec<NfaState>,
}

impl Nfa {
    fn from_pattern(pattern: &[u8]) -> Self {
        let mut states = vec![NfaState::new()];
        let mut current = 0usize;

        for &ch in pattern {
            let next = states.len();
            states.push(NfaState::new());

            match ch {
                b'*' => {
                    // ε-skip into the star state plus a self-loop on any byte.
                    states[current].epsilon.push(next);
                    states[next].any_edges.push(next);
                }
                b'?' => {
                    states[current].any_edges.push(next);
                }
                literal => {
                    states[current]
                        .byte_edges
                        .entry(literal)
                        .or_default()
                        .push(next);
                }
            }
            current = next;
        }

        states[current].accepting = true;
        Nfa { states }
    }

    fn epsilon_closure(&self, set: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut closure = set.clone();
        let mut stack: Vec<usize> = set.iter().copied().collect();
        while let Some(s) = stack.pop() {
            for &eps in &self.states[s].epsilon {
                if closure.insert(eps) {
                    stack.push(eps);
                }
            }
        }
        closure
    }

    fn is_accepting(&self, set: &BTreeSet<usize>) -> bool {
        set.iter().any(|&s| self.states[s].accepting)
    }

    /// Subset construction. Fails once the DFA grows past `MAX_DFA_STATES`.
    fn determinize(&self) -> Result<WildcardAutomaton> {
        let mut dfa = WildcardAutomaton {
            transitions: vec![[DEAD_STATE; 256]], // dead state
            accepting: vec![false],
        };

        let start_set = self.epsilon_closure(&BTreeSet::from([0]));
        dfa.transitions.push([DEAD_STATE; 256]);
        dfa.accepting.push(self.is_accepting(&start_set));

        let mut set_to_id: HashMap<Vec<usize>, State> = HashMap::new();
        set_to_id.insert(start_set.iter().copied().collect(), 1);

        let mut queue: Vec<(BTreeSet<usize>, State)> = vec![(start_set, 1)];

        while let Some((current_set, current_id)) = queue.pop() {
            for byte in 0..=255u8 {
                let mut next_set = BTreeSet::new();
                for &s in &current_set {
                    if let Some(targets) = self.states[s].byte_edges.get(&byte) {
                        next_set.extend(targets.iter().copied());
                    }
                    next_set.extend(self.states[s].any_edges.iter().copied());
                }

                if next_set.is_empty() {
                    continue; // stays DEAD_STATE
                }

                let next_set = self.epsilon_closure(&next_set);
                let key: Vec<usize> = next_set.iter().copied().collect();

                let next_id = match set_to_id.get(&key) {
                    Some(&id) => id,
                    None => {
                        if dfa.transitions.len() >= MAX_DFA_STATES {
                            return Err(ScourError::DfaStateLimitExceeded);
                        }
                        let id = dfa.transitions.len() as State;
                        set_to_id.insert(key, id);
                        dfa.transitions.push([DEAD_STATE; 256]);
                        dfa.accepting.push(self.is_accepting(&next_set));
                        queue.push((next_set, id));
                        id
                    }
                };
                dfa.transitions[current_id as usize][byte as usize] = next_id;
            }
        }

        Ok(dfa)
    }
}
