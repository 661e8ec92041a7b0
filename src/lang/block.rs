use super::value::Value;
use serde::{Deserialize, Serialize};

/// Stable identifier of a block inside a [`BlockArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Contents of an input slot. Absent slots are simply not present on the block.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A value typed directly into the slot.
    Literal(Value),

    /// A nested reporter, or the first block of a sub-stack.
    Block(BlockId),
}

/// Extra data carried by procedure call blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Name of the called procedure, e.g. `"move %s steps"`.
    pub proccode: String,
}

/// A single block record.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub opcode: String,
    pub inputs: Vec<(String, Input)>,
    pub fields: Vec<(String, String)>,
    pub mutation: Option<Mutation>,
    pub next: Option<BlockId>,
}

impl Block {
    pub fn new(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            inputs: Vec::new(),
            fields: Vec::new(),
            mutation: None,
            next: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.inputs.push((name.into(), input));
        self
    }

    pub fn with_literal(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_input(name, Input::Literal(value.into()))
    }

    pub fn with_block(self, name: impl Into<String>, id: BlockId) -> Self {
        self.with_input(name, Input::Block(id))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn with_proccode(mut self, proccode: impl Into<String>) -> Self {
        self.mutation = Some(Mutation {
            proccode: proccode.into(),
        });
        self
    }

    pub fn with_next(mut self, next: BlockId) -> Self {
        self.next = Some(next);
        self
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, input)| input)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Owning storage for every block of a target.
///
/// Blocks refer to each other only through [`BlockId`]s, so the graph never
/// holds owning pointers and can be shared read-only between scripts.
#[derive(Debug, Clone, Default)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Add a block and return its identifier.
    pub fn insert(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// Point `from.next` at `to`. Returns false if `from` does not exist.
    pub fn link(&mut self, from: BlockId, to: BlockId) -> bool {
        match self.blocks.get_mut(from.0 as usize) {
            Some(block) => {
                block.next = Some(to);
                true
            }
            None => false,
        }
    }

    /// Insert `blocks` as one stack (each linked to the following one) and
    /// return the id of the first block.
    pub fn insert_stack(&mut self, blocks: Vec<Block>) -> Option<BlockId> {
        let ids: Vec<BlockId> = blocks.into_iter().map(|b| self.insert(b)).collect();
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1]);
        }
        ids.first().copied()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_stack_links_blocks_in_order() {
        let mut arena = BlockArena::new();
        let first = arena
            .insert_stack(vec![
                Block::new("event_whenflagclicked"),
                Block::new("motion_movesteps").with_literal("STEPS", 10.0),
                Block::new("motion_turnright").with_literal("DEGREES", 15.0),
            ])
            .unwrap();

        let hat = arena.get(first).unwrap();
        let second = arena.get(hat.next.unwrap()).unwrap();
        assert_eq!(second.opcode, "motion_movesteps");
        let third = arena.get(second.next.unwrap()).unwrap();
        assert_eq!(third.opcode, "motion_turnright");
        assert!(third.next.is_none());
    }

    #[test]
    fn test_input_and_field_lookup() {
        let block = Block::new("data_setvariableto")
            .with_field("VARIABLE", "score")
            .with_literal("VALUE", "0");

        assert_eq!(block.field("VARIABLE"), Some("score"));
        assert_eq!(block.input("VALUE"), Some(&Input::Literal(Value::from("0"))));
        assert!(block.input("MISSING").is_none());
    }

    #[test]
    fn test_link_unknown_block() {
        let mut arena = BlockArena::new();
        assert!(!arena.link(BlockId(3), BlockId(0)));
        assert!(arena.is_empty());
    }
}
