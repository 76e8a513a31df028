// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer
//!
//! - [`camera`]: capture sessions over a native capture engine, with the
//!   GStreamer platform as the shipped engine

pub mod camera;
