pub mod architecture;
pub mod conv_net;
pub mod model_function;
