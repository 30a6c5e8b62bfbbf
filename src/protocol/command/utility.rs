use crate::buffer::{IntWidth, PayloadBuffer};
use crate::constant::CommandByte;
use crate::protocol::command::query::write_text_command;

fn write_bare(out: &mut PayloadBuffer, command: CommandByte) {
    out.clear();
    out.write_int(IntWidth::Int1, command as u64);
}

/// Write COM_QUIT command
pub fn write_quit(out: &mut PayloadBuffer) {
    write_bare(out, CommandByte::Quit);
}

/// Write COM_PING command
pub fn write_ping(out: &mut PayloadBuffer) {
    write_bare(out, CommandByte::Ping);
}

/// Write COM_RESET_CONNECTION command
pub fn write_reset_connection(out: &mut PayloadBuffer) {
    write_bare(out, CommandByte::ResetConnection);
}

/// Write COM_INIT_DB command
pub fn write_init_db(out: &mut PayloadBuffer, database: &str, comment: Option<&str>) {
    write_text_command(out, CommandByte::InitDb, comment, database);
}
