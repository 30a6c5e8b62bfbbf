use crate::buffer::{IntWidth, PayloadBuffer, StringKind};
use crate::constant::CommandByte;

/// Write a command whose body is SQL text.
///
/// For COM_QUERY, COM_STMT_PREPARE and COM_INIT_DB a `comment` is placed in a
/// `/* ... */` block ahead of the text.
pub fn write_text_command(
    out: &mut PayloadBuffer,
    command: CommandByte,
    comment: Option<&str>,
    text: &str,
) {
    out.clear();
    out.write_int(IntWidth::Int1, command as u64);
    if let Some(comment) = comment
        && command.accepts_comment()
    {
        out.write_bytes(StringKind::Eof, b"/* ");
        // A "*/" inside the comment would end it early
        out.write_bytes(StringKind::Eof, comment.replace("*/", "* /").as_bytes());
        out.write_bytes(StringKind::Eof, b" */ ");
    }
    out.write_bytes(StringKind::Eof, text.as_bytes());
}

/// Write COM_QUERY command
pub fn write_query(out: &mut PayloadBuffer, sql: &str, comment: Option<&str>) {
    write_text_command(out, CommandByte::Query, comment, sql);
}
