//! Hand-written protobuf types for the operation journal.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are the on-disk contract; never renumber.

use prost::Message;

// ----------------------------------------------------------------------------
// Journal Entry
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct ProtoJournalEntry {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(uint64, tag = "2")]
    pub logical_time_ms: u64,
    #[prost(message, optional, tag = "3")]
    pub op: Option<ProtoRecordOp>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRecordOp {
    #[prost(oneof = "OpKind", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub kind: Option<OpKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum OpKind {
    #[prost(message, tag = "1")]
    Tracked(Tracked),
    #[prost(message, tag = "2")]
    DelegateSubmitted(Submitted),
    #[prost(message, tag = "3")]
    DelegationObserved(Observed),
    #[prost(message, tag = "4")]
    CommitSubmitted(CommitSubmitted),
    #[prost(message, tag = "5")]
    CommitLanded(Observed),
    #[prost(message, tag = "6")]
    AskSubmitted(AskSubmitted),
    #[prost(message, tag = "7")]
    AnswerObserved(AnswerObserved),
    #[prost(message, tag = "8")]
    RequestAbandoned(Observed),
    #[prost(message, tag = "9")]
    UndelegateSubmitted(Submitted),
    #[prost(message, tag = "10")]
    UndelegationObserved(Observed),
    #[prost(message, tag = "11")]
    TaskSubmitted(TaskSubmitted),
}

// ----------------------------------------------------------------------------
// Op payloads
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct Tracked {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub payer: Vec<u8>,
    #[prost(string, tag = "3")]
    pub status: String,
}

/// A lifecycle transaction was sent.
#[derive(Clone, PartialEq, Message)]
pub struct Submitted {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(string, tag = "2")]
    pub signature: String,
}

/// An asynchronous step was seen to complete.
#[derive(Clone, PartialEq, Message)]
pub struct Observed {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommitSubmitted {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(string, tag = "2")]
    pub signature: String,
    #[prost(string, tag = "3")]
    pub data_hash: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AskSubmitted {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub interaction: Vec<u8>,
    #[prost(string, tag = "3")]
    pub prompt: String,
    #[prost(string, tag = "4")]
    pub layer: String,
    #[prost(string, tag = "5")]
    pub signature: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AnswerObserved {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(string, tag = "2")]
    pub response: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TaskSubmitted {
    #[prost(bytes = "vec", tag = "1")]
    pub record: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub task_id: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub queue: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub task: Vec<u8>,
    #[prost(string, tag = "5")]
    pub signature: String,
}
