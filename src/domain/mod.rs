//! Core data model and scheduling algorithms, kept free of I/O: nothing
//! in this module talks to the bridge, the clock, or the filesystem
//! directly.

pub mod drain_table;
pub mod equivalence_class;
pub mod ids;
pub mod job;
pub mod placement;
pub mod process_group;
pub mod reservation;
pub mod reservation_controller;
pub mod resource;
pub mod resource_set;
