//! Segmentor abstractions
//!
//! - `Param`: named flat parameter buffers with gradient slots
//! - `Segmentor`: the model seam (forward, backward, parameter access)
//! - `StateDict` export/import with strict and bootstrap load modes
//! - `LinearSegmentor`: per-pixel linear reference head
//! - bilinear logit upsampling for evaluation

mod interpolate;
mod param;
mod segmentor;

pub use interpolate::resize_bilinear;
pub use param::Param;
pub use segmentor::{
    load_state_dict, state_dict, LinearSegmentor, LoadMode, Segmentor, StateDict, TensorData,
};
