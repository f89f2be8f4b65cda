//! Frames and cursors.
//!
//! A frame is one activation of a sequence. Its cursor holds one index per
//! nesting depth; resolving the cursor walks the indices through nested
//! sequences from the frame's root. Inline nested sequences extend the cursor
//! of the same frame, while sub-programs entered through `execute` get a frame
//! of their own.

use serde::{Deserialize, Serialize};

use crate::program::{Instruction, Sentence, Sequence};

/// What the cursor currently addresses.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Position<'a> {
    /// A label, skipped at runtime.
    Label,
    /// An inline nested scope to descend into.
    Scope,
    /// An instruction to dispatch.
    Instruction(&'a Instruction),
    /// Past the last element at the innermost depth.
    End,
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    sequence: Sequence,
    cursor: Vec<usize>,
    step_caller: bool,
}

impl Frame {
    pub(crate) fn new(sequence: Sequence, start: usize) -> Self {
        Self {
            sequence,
            cursor: vec![start],
            step_caller: false,
        }
    }

    /// Frame for a sub-program. `step_caller` is set when the parent's
    /// current instruction had been dispatched, so that returning from this
    /// frame steps past it instead of running it.
    pub(crate) fn nested(sequence: Sequence, start: usize, step_caller: bool) -> Self {
        Self {
            step_caller,
            ..Self::new(sequence, start)
        }
    }

    /// Whether the parent steps past its current position on return.
    pub(crate) fn steps_caller(&self) -> bool {
        self.step_caller
    }

    /// Resolve the cursor.
    pub(crate) fn position(&self) -> Position<'_> {
        let mut scope: &[Sentence] = &self.sequence;
        let last = self.cursor.len() - 1;
        for (depth, &index) in self.cursor.iter().enumerate() {
            let Some(sentence) = scope.get(index) else {
                return Position::End;
            };
            match sentence {
                Sentence::Sequence(inner) if depth < last => scope = inner,
                Sentence::Sequence(_) => return Position::Scope,
                Sentence::Label(_) => return Position::Label,
                Sentence::Instruction(instruction) => return Position::Instruction(instruction),
            }
        }
        Position::End
    }

    /// Move to the next element at the innermost depth.
    pub(crate) fn advance(&mut self) {
        if let Some(index) = self.cursor.last_mut() {
            *index += 1;
        }
    }

    /// Enter the inline scope under the cursor.
    pub(crate) fn descend(&mut self) {
        self.cursor.push(0);
    }

    /// Leave the innermost inline scope and step past it. Returns `false`
    /// when the cursor is already at the frame's root depth.
    pub(crate) fn ascend(&mut self) -> bool {
        if self.cursor.len() <= 1 {
            return false;
        }
        self.cursor.pop();
        self.advance();
        true
    }

    pub(crate) fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            cursor: self.cursor.clone(),
            len: self.sequence.len(),
        }
    }
}

/// Inspection view of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    /// Cursor indices, outermost first.
    pub cursor: Vec<usize>,
    /// Number of sentences at the frame's root depth.
    pub len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: serde_json::Value) -> Frame {
        let sequence = Sentence::from_value(&value).unwrap().into_sequence();
        Frame::new(sequence, 0)
    }

    #[test]
    fn walks_nested_scopes() {
        let mut frame = frame(json!(["a", [{"handler": "x"}], {"handler": "y"}]));

        assert_eq!(frame.position(), Position::Label);
        frame.advance();
        assert_eq!(frame.position(), Position::Scope);
        frame.descend();
        assert!(matches!(frame.position(), Position::Instruction(i) if i.handler == "x"));
        frame.advance();
        assert_eq!(frame.position(), Position::End);
        assert!(frame.ascend());
        assert_eq!(frame.snapshot().cursor, vec![2]);
        assert!(matches!(frame.position(), Position::Instruction(i) if i.handler == "y"));
        frame.advance();
        assert_eq!(frame.position(), Position::End);
        assert!(!frame.ascend());
    }

    #[test]
    fn empty_scopes_end_immediately() {
        let mut frame = frame(json!([[]]));
        assert_eq!(frame.position(), Position::Scope);
        frame.descend();
        assert_eq!(frame.position(), Position::End);
        assert!(frame.ascend());
        assert_eq!(frame.position(), Position::End);
    }

    #[test]
    fn starts_at_offset() {
        let sequence = Sentence::from_value(&json!(["a", "b"])).unwrap().into_sequence();
        let frame = Frame::new(sequence, 2);
        assert_eq!(frame.position(), Position::End);
        assert_eq!(frame.snapshot(), FrameSnapshot { cursor: vec![2], len: 2 });
    }

    #[test]
    fn root_frames_do_not_step_a_caller() {
        let sequence = Sentence::from_value(&json!(["a"])).unwrap().into_sequence();
        assert!(!Frame::new(sequence.clone(), 0).steps_caller());
        assert!(Frame::nested(sequence.clone(), 0, true).steps_caller());
        assert!(!Frame::nested(sequence, 0, false).steps_caller());
    }
}
