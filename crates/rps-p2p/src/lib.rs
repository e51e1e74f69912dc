//! rps-p2p: peer-to-peer rock-paper-scissors
//!
//! two players find each other through a well-known bootstrap node, then
//! exchange one move per round over iroh QUIC streams until one of them has
//! won the majority of five decisive rounds.
//!
//! ## match flow
//!
//! ```text
//! player A ──Provide/FindProviders──► bootstrap ◄──Provide/FindProviders── player B
//!    │                                                                       │
//!    │  "/game/rps": one stream per move, "<code>\n"                         │
//!    ├──────────────────────────────────────────────────────────────────────►│
//!    │◄──────────────────────────────────────────────────────────────────────┤
//! ```
//!
//! ## roles
//!
//! - **Bootstrap**: answers rendezvous lookups, never plays
//! - **Player**: announces, resolves one opponent, plays one match

pub mod channel;
pub mod config;
pub mod game;
pub mod identity;
pub mod node;
pub mod overlay;
pub mod protocol;
pub mod rendezvous;
pub mod session;

pub use channel::{move_buffer, read_moves, send_move, ChannelError, MoveInbox, MoveSink};
pub use config::{ConfigError, Timing};
pub use game::{Move, RoundOutcome, Tally, Verdict, MAX_ROUNDS};
pub use identity::{Identity, IdentityError, KEY_DIR};
pub use node::{BootstrapAddr, BootstrapNode, PeerRegistry, PlayerNode};
pub use overlay::{Overlay, OverlayError, PeerId, Topic};
pub use protocol::{Role, GAME_ALPN, RENDEZVOUS_ALPN, RENDEZVOUS_TOPIC};
pub use rendezvous::{Discoverer, ProviderStore, RendezvousError};
pub use session::{MatchReport, Phase, RoundRecord, Session, SessionError};
