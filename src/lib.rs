//! # chanbus
//!
//! In-process RPC bus and callback-oriented task executor for actor-style
//! server modules.
//!
//! Every module in a server built on this crate owns a single-threaded event
//! loop that (a) receives RPC-style work from peer modules and (b) offloads
//! blocking or CPU-heavy work to worker tasks whose completion callbacks are
//! drained back on the owning loop. Module state therefore never needs locks.
//!
//! ## Components
//!
//! - [Server] / [Client]: a typed, channel-mediated call dispatcher. A server
//!   registers named procedures of fixed arity ([Procedure]); clients invoke
//!   them synchronously ([Client::call_one] and friends), asynchronously with
//!   a completion [Callback] ([Client::async_call]), or fire-and-forget
//!   ([Server::go]).
//! - [Executor] / [LinearContext]: a lightweight job launcher. Bodies run on
//!   fresh workers; completion callbacks funnel into one channel drained by
//!   the owner. The linear variant preserves strict submission order.
//!
//! The two components share no state; compose them in one event loop with
//! `tokio::select!` over [Server::call_channel], [Executor::callback_channel]
//! and any [Client::async_return_channel].
//!
//! ## Delivery guarantees
//!
//! Every successful launch of a task or call eventually produces exactly one
//! callback or reply delivery, even if the user code panics. Panics are
//! contained, logged (with a bounded stack trace when
//! [config::set_stack_buffer_size] is non-zero) and surfaced as
//! [CallError::Panicked] where a reply path exists.
//!
//! ## Example
//!
//! ```
//! use chanbus::{vargs, Executor, Procedure, Server, Value};
//!
//! #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! async fn main() {
//!     // one module owns the server and drains its call channel
//!     let mut server = Server::new(16);
//!     server.register(
//!         "add",
//!         Procedure::one(|args| {
//!             Value::from(args[0].as_int().unwrap() + args[1].as_int().unwrap())
//!         }),
//!     );
//!     let client = server.open(4);
//!
//!     // a peer module calls in from its own task
//!     let caller = tokio::spawn(async move {
//!         let r = client.call_one("add", vargs![1, 2]).await.unwrap();
//!         assert_eq!(r.as_int(), Some(3));
//!     });
//!
//!     // owner side: drain one request and run it
//!     let ci = server.call_channel().recv().await.unwrap();
//!     server.exec(ci).await;
//!     caller.await.unwrap();
//!
//!     // offload blocking work; the callback is drained on the owner loop
//!     let mut exec = Executor::new(8);
//!     exec.go(|| { /* blocking or CPU-heavy work */ }, || println!("job done"));
//!     exec.close().await;
//!     assert!(exec.is_idle());
//! }
//! ```

pub mod config;
pub mod error;
pub mod value;

mod client;
mod executor;
mod proto;
mod server;
mod stack;

pub use client::Client;
pub use error::CallError;
pub use executor::{Executor, LinearContext, TaskCb};
pub use proto::{Arity, CallInfo, Callback, MethodId, Payload, Procedure, ReplySink, RetInfo};
pub use server::Server;
pub use value::Value;
