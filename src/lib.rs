extern crate nalgebra as na;

pub mod config;
pub mod integrator;
pub mod mhe;
pub mod model;
pub mod mpc;
pub mod pendulum;
pub mod simulator;
pub mod timing;
pub mod trajectory;
