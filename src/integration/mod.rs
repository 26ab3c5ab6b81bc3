//! End-to-end tests over the full stack: router, relay, cache and
//! scheduler, with `sh` standing in for yt-dlp and ffmpeg.

pub mod fixtures;

mod e2e;
