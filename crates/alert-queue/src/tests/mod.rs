//! Transport tests.
//!
//! - redis_streams: drain, claim and settle transitions of the Redis Streams
//!   channel, driven against a simulated Redis
