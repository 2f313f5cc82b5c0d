pub mod epsilon_fqi;
pub mod fqi;
