//! `TASK@NODE` address parsing.

use acnet_protocol::Status;

/// Node half of a task address: either a numeric trunk/node literal
/// (`#123`) or a symbolic name to resolve at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeSpec<'a> {
    Literal(u16),
    Name(&'a str),
}

/// Splits a `TASK@NODE` pair. Malformed forms fail with `INVARG`.
pub(crate) fn parse_task(task: &str) -> Result<(&str, NodeSpec<'_>), Status> {
    let (task_part, node_part) = task.split_once('@').ok_or(Status::INVARG)?;
    if task_part.is_empty() || node_part.is_empty() {
        return Err(Status::INVARG);
    }
    let node = match node_part.strip_prefix('#') {
        Some(literal) => NodeSpec::Literal(literal.parse().map_err(|_| Status::INVARG)?),
        None => NodeSpec::Name(node_part),
    };
    Ok((task_part, node))
}
