/// The buffer event set, named after the autocommand events they mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    BufNew,
    BufReadPre,
    BufReadPost,
    BufWritePre,
    BufWritePost,
    BufEnter,
    BufLeave,
    BufDelete,
    BufWipeout,
    TextChanged,
    TextChangedI,
    TextChangedP,
    TextYankPost,
    InsertEnter,
    InsertLeavePre,
    InsertLeave,
    InsertCharPre,
    CursorMoved,
    CursorMovedI,
    CursorHold,
    CompleteDone,
    WinEnter,
    WinLeave,
    ModeChanged,
    User,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BufNew => "buf_new",
            EventType::BufReadPre => "buf_read_pre",
            EventType::BufReadPost => "buf_read_post",
            EventType::BufWritePre => "buf_write_pre",
            EventType::BufWritePost => "buf_write_post",
            EventType::BufEnter => "buf_enter",
            EventType::BufLeave => "buf_leave",
            EventType::BufDelete => "buf_delete",
            EventType::BufWipeout => "buf_wipe_out",
            EventType::TextChanged => "text_changed",
            EventType::TextChangedI => "text_changed_i",
            EventType::TextChangedP => "text_changed_p",
            EventType::TextYankPost => "text_yank_post",
            EventType::InsertEnter => "insert_enter",
            EventType::InsertLeavePre => "insert_leave_pre",
            EventType::InsertLeave => "insert_leave",
            EventType::InsertCharPre => "insert_char_pre",
            EventType::CursorMoved => "cursor_moved",
            EventType::CursorMovedI => "cursor_moved_i",
            EventType::CursorHold => "cursor_hold",
            EventType::CompleteDone => "complete_done",
            EventType::WinEnter => "win_enter",
            EventType::WinLeave => "win_leave",
            EventType::ModeChanged => "mode_changed",
            EventType::User => "user",
        }
    }

    /// Look an event up by its wire name, as used in plugin registrations.
    pub fn parse(name: &str) -> Option<EventType> {
        use EventType::*;
        const ALL: &[EventType] = &[
            BufNew,
            BufReadPre,
            BufReadPost,
            BufWritePre,
            BufWritePost,
            BufEnter,
            BufLeave,
            BufDelete,
            BufWipeout,
            TextChanged,
            TextChangedI,
            TextChangedP,
            TextYankPost,
            InsertEnter,
            InsertLeavePre,
            InsertLeave,
            InsertCharPre,
            CursorMoved,
            CursorMovedI,
            CursorHold,
            CompleteDone,
            WinEnter,
            WinLeave,
            ModeChanged,
            User,
        ];
        ALL.iter().find(|event| event.as_str() == name).copied()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by an event. Listeners receive a shared reference and
/// must clone whatever they keep beyond the callback.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Buffer {
        buffer_id: u32,
        path: Option<String>,
    },
    Text {
        buffer_id: u32,
        range: (usize, usize),
        text: String,
    },
    Cursor {
        buffer_id: u32,
        line: usize,
        column: usize,
        byte_offset: usize,
    },
    Char {
        buffer_id: u32,
        ch: char,
    },
    Mode {
        old: String,
        new: String,
    },
    Window {
        window_id: u32,
    },
    User {
        name: String,
        data: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_event_names_round_trip() {
        for name in ["buf_new", "text_changed", "insert_char_pre", "buf_wipe_out"] {
            let event = EventType::parse(name).unwrap();
            assert_eq!(event.as_str(), name);
        }
        assert_eq!(EventType::parse("no_such_event"), None);
    }
}
