// Library root
// -----------
// Client for a hosted image-classification service: create a project,
// upload labelled images, train remotely, publish, predict.
//
// Module responsibilities:
// - `config`: settings from environment variables.
// - `models`: wire types of the training and prediction endpoints.
// - `service`: traits the workflow talks to; `api` implements them over
//   HTTP, tests implement them with stubs.
// - `api`: authenticated blocking HTTP clients.
// - `dataset`: local label directories and their images.
// - `workflow`: the ordered run (project, tags, uploads, training,
//   publish, prediction).
// - `progress`: spinners and the log writer that keeps them readable.
// - `ui`: the interactive terminal menu.
pub mod api;
pub mod config;
pub mod dataset;
pub mod error;
pub mod models;
pub mod progress;
pub mod service;
pub mod ui;
pub mod workflow;
