//! tidepool-protocol: wire envelope for control-plane RPC.
//!
//! Every control-plane call is a single request/reply exchange over a
//! TCP stream. Messages travel as length-prefixed bincode frames; a reply
//! is either an opaque payload or a structured [`Status`].
//!
//! # quick start
//!
//! ```
//! use tidepool_protocol::{RpcReply, Status, StatusCode, StatusDetail};
//!
//! let reply = RpcReply::Err(Status::not_leader("10.0.0.4:10001", vec![]));
//! match reply {
//!     RpcReply::Err(status) => {
//!         assert_eq!(status.code, StatusCode::Unavailable);
//!         assert!(matches!(status.detail, Some(StatusDetail::NotLeader { .. })));
//!     }
//!     RpcReply::Ok(_) => unreachable!(),
//! }
//! ```

pub mod frame;
pub mod message;
pub mod status;

pub use frame::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use message::{RpcReply, RpcRequest};
pub use status::{Status, StatusCode, StatusDetail};
