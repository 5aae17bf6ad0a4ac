// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
pub mod background;
pub mod config;
pub mod corrector;
pub mod document;
pub mod extensions;
pub mod image_colour;
pub mod snapshot;
pub mod store;
pub mod types;
