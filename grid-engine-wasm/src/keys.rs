use crate::model::Direction;

/// What a key press asks the grid to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Move(Direction),
    Undo,
    /// Space: redraw from the start node.
    Reset,
    /// Enter: ask the server to run a headset command block.
    RequestCommandBlock,
    ToggleGuide,
    /// Submit the entered sequence (verify, or store in create mode).
    Submit,
}

impl KeyCommand {
    /// Map a DOM `KeyboardEvent.key` value to a command.
    pub fn from_key(key: &str) -> Option<KeyCommand> {
        match key {
            "a" | "A" => Some(KeyCommand::Move(Direction::Left)),
            "w" | "W" => Some(KeyCommand::Move(Direction::Up)),
            "d" | "D" => Some(KeyCommand::Move(Direction::Right)),
            "s" | "S" => Some(KeyCommand::Move(Direction::Down)),
            " " | "Spacebar" => Some(KeyCommand::Reset),
            "Enter" => Some(KeyCommand::RequestCommandBlock),
            "Backspace" | "u" | "U" => Some(KeyCommand::Undo),
            "g" | "G" => Some(KeyCommand::ToggleGuide),
            "c" | "C" => Some(KeyCommand::Submit),
            _ => None,
        }
    }
}
