//! Variational approximation families.
//!
//! Each family is a distribution q(θ; λ) over the model parameter θ,
//! indexed by a flat variational parameter vector λ. Sampling goes through
//! a reparameterization θ = T(λ, ε) with parameter-free noise ε, so that
//! gradients of expectations w.r.t. λ can be pulled back through `T`.

mod location_scale;
mod mf_gaussian;
mod mf_student_t;
mod traits;

pub use mf_gaussian::MFGaussian;
pub use mf_student_t::MFStudentT;
pub use traits::ApproximationFamily;
