// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod delete_file;
pub mod edit_file;
pub mod glob_file_search;
pub mod grep;
pub mod list_dir;
pub mod query_database;
pub mod read_file;
pub mod run_terminal_command;
pub mod web_fetch;
pub mod web_search;
pub mod write;
