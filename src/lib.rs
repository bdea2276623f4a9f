//! # NeuroScan volumetric data server
//!
//! This crate turns NIfTI (`.nii`, `.nii.gz`) volumes into a compact binary
//! format that a browser-based 3D renderer can upload straight into a
//! texture, and serves them over HTTP.
//!
//! Every uploaded file goes through the same pipeline:
//!  - Load: the NIfTI file is read into a 3D `f64` array. 4D files (time
//!    series, stacked channels) are reduced to their first volume.
//!  - Normalize: non-finite values become 0, then intensities are rescaled
//!    to [0, 1]. Uniform volumes become all zeros.
//!  - Pack: a 40-byte header followed by little-endian `f32` samples, see
//!    [`wire`] for the exact layout.
//!
//! Results are cached per file in a size-bounded cache, and concurrent
//! requests for the same file only run the pipeline once.
//!
//! Besides single volumes the server keeps track of segmentation masks
//! (optionally linked to the volume they annotate) and of channel groups
//! that bundle the four MRI sequences T1, T1ce, T2 and FLAIR of one scan
//! session.
//!
//! # Examples
//!
//! ## Packing a volume without the server
//!
//! ```no_run
//! # use neuroscan::{pipeline::ProcessingPipeline, wire::WireHeader};
//! # use std::path::Path;
//! let blob = ProcessingPipeline::default()
//!     .process(Path::new("brain.nii.gz"))
//!     .expect("should have loaded the volume");
//! let header = WireHeader::decode(&blob).expect("blob starts with a header");
//! println!("{}x{}x{}", header.width, header.height, header.depth);
//! ```
//!
//! ## Running the HTTP server
//!
//! ```no_run
//! # use neuroscan::{config::Settings, server::{AppState, router}};
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::default();
//! let state = AppState::open(&settings)?;
//! let app = router(state, &settings.server);
//! let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channels;
pub mod config;
pub mod enums;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod volume;
pub mod volume_loader;
pub mod wire;

pub use error::{Error, ErrorCategory};
