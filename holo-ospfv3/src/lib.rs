//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod area;
pub mod collections;
pub mod configuration;
pub mod debug;
pub mod error;
pub mod events;
pub mod flood;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod origination;
pub mod output;
pub mod packet;
pub mod route;
pub mod southbound;
pub mod spf;
pub mod tasks;
