// ABOUTME: Configuration loading for the gateway process and tenant document
// ABOUTME: Splits env-derived server settings from the structured tenant file
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! Configuration management.
//!
//! Two layers: [`environment::ServerConfig`] covers process-level knobs read
//! from environment variables; [`tenant_file`] parses and validates the
//! structured tenant document (tenants, policy, feature flags) with `${VAR}`
//! interpolation.

pub mod environment;
pub mod tenant_file;

pub use environment::ServerConfig;
