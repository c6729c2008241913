use crate::ChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    UnknownTable(#[from] UnknownTable),
}

/// A table name the rule set does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("table {0} is not part of the rule set")]
pub struct UnknownTable(pub String);
