pub mod event;

pub use event::{
    BroadcastEvent, Classification, Direction, NormalizedEvent, SourceChain, StoredEvent,
};
