use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StudentT;
use special::Gamma as SpecialGamma;

use super::location_scale;
use super::traits::ApproximationFamily;
use crate::error::{check_dim, LentilError, Result};

fn ln_beta(a: f64, b: f64) -> f64 {
    SpecialGamma::ln_gamma(a).0 + SpecialGamma::ln_gamma(b).0 - SpecialGamma::ln_gamma(a + b).0
}

/// Mean-field Student's t with fixed degrees of freedom ν
///
/// θ_j = μ_j + σ_j t_j with t_j ~ t(ν). Same parameter layout as
/// [`MFGaussian`](super::MFGaussian): λ = [μ, ln σ].
#[derive(Debug, Clone)]
pub struct MFStudentT {
    dim: usize,
    df: f64,
    noise: StudentT<f64>,
    // per-coordinate normalizer of log q, without the ln σ term
    log_norm: f64,
    // per-coordinate entropy, without the ln σ term
    entropy_const: f64,
}

impl MFStudentT {
    /// # Arguments
    /// * `dim` - number of coordinates
    /// * `df` - degrees of freedom, must exceed 2 so the covariance exists
    pub fn new(dim: usize, df: f64) -> Result<Self> {
        if dim == 0 {
            return Err(LentilError::InvalidOption {
                name: "dim",
                reason: "must be positive".into(),
            });
        }
        if !(df.is_finite() && df > 2.0) {
            return Err(LentilError::InvalidOption {
                name: "df",
                reason: format!("must be finite and greater than 2, got {}", df),
            });
        }
        let noise = StudentT::new(df).map_err(|e| LentilError::InvalidOption {
            name: "df",
            reason: e.to_string(),
        })?;

        let half = 0.5 * (df + 1.0);
        let log_norm = SpecialGamma::ln_gamma(half).0
            - SpecialGamma::ln_gamma(0.5 * df).0
            - 0.5 * (df * std::f64::consts::PI).ln();
        let entropy_const = half * (half.digamma() - (0.5 * df).digamma())
            + 0.5 * df.ln()
            + ln_beta(0.5 * df, 0.5);

        Ok(Self {
            dim,
            df,
            noise,
            log_norm,
            entropy_const,
        })
    }

    pub fn df(&self) -> f64 {
        self.df
    }
}

impl ApproximationFamily for MFStudentT {
    fn dim(&self) -> usize {
        self.dim
    }

    fn var_param_dim(&self) -> usize {
        2 * self.dim
    }

    fn sample_noise(&self, n: usize, rng: &mut StdRng) -> Array2<f64> {
        Array2::from_shape_simple_fn((n, self.dim), || rng.sample(&self.noise))
    }

    fn transform(&self, var_param: &Array1<f64>, noise: &Array2<f64>) -> Result<Array2<f64>> {
        location_scale::transform(self.dim, var_param, noise)
    }

    fn pullback(
        &self,
        var_param: &Array1<f64>,
        noise: ArrayView1<f64>,
        grad_x: ArrayView1<f64>,
    ) -> Result<Array1<f64>> {
        location_scale::pullback(self.dim, var_param, noise, grad_x)
    }

    fn log_density(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<f64> {
        let (mean, ln_sd) = location_scale::split(self.dim, var_param)?;
        check_dim(self.dim, x.len())?;
        let nu = self.df;
        let lp = x
            .iter()
            .zip(mean.iter().zip(ln_sd.iter()))
            .map(|(&xi, (&m, &l))| {
                let z = (xi - m) * (-l).exp();
                self.log_norm - l - 0.5 * (nu + 1.0) * (z * z / nu).ln_1p()
            })
            .sum();
        Ok(lp)
    }

    fn log_density_grad(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        let nu = self.df;
        location_scale::log_density_grad(self.dim, var_param, x, |z| -(nu + 1.0) * z / (nu + z * z))
    }

    fn entropy(&self, var_param: &Array1<f64>) -> Result<f64> {
        let (_, ln_sd) = location_scale::split(self.dim, var_param)?;
        Ok(ln_sd.sum() + self.dim as f64 * self.entropy_const)
    }

    fn entropy_grad(&self, var_param: &Array1<f64>) -> Result<Array1<f64>> {
        location_scale::entropy_grad(self.dim, var_param)
    }

    /// Var[θ_j] = σ_j² ν / (ν - 2)
    fn mean_and_cov(&self, var_param: &Array1<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
        location_scale::mean_and_diag_cov(self.dim, var_param, self.df / (self.df - 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximations::MFGaussian;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_small_df() {
        assert!(MFStudentT::new(2, 2.0).is_err());
        assert!(MFStudentT::new(2, f64::NAN).is_err());
        assert!(MFStudentT::new(0, 5.0).is_err());
    }

    #[test]
    fn test_log_density_at_zero() -> Result<()> {
        // t(ν=3) at 0: Γ(2) / (Γ(1.5) √(3π)) = 1 / (0.5√π · √(3π)) = 2 / (π√3)
        let q = MFStudentT::new(1, 3.0)?;
        let lp = q.log_density(&array![0.0, 0.0], array![0.0].view())?;
        let expected = (2.0 / (std::f64::consts::PI * 3f64.sqrt())).ln();
        assert_abs_diff_eq!(lp, expected, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_entropy_approaches_gaussian() -> Result<()> {
        let t = MFStudentT::new(3, 1e6)?;
        let g = MFGaussian::new(3)?;
        let lambda = array![0.0, 1.0, 2.0, 0.1, -0.3, 0.5];
        assert_abs_diff_eq!(t.entropy(&lambda)?, g.entropy(&lambda)?, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_entropy_exceeds_gaussian() -> Result<()> {
        // heavier tails at the same scale carry more entropy
        let t = MFStudentT::new(2, 5.0)?;
        let g = MFGaussian::new(2)?;
        let lambda = array![0.0, 0.0, 0.0, 0.0];
        assert!(t.entropy(&lambda)? > g.entropy(&lambda)?);
        Ok(())
    }

    #[test]
    fn test_log_density_grad_matches_finite_difference() -> Result<()> {
        let q = MFStudentT::new(2, 4.0)?;
        let lambda = array![0.5, -0.5, 0.2, -0.1];
        let x = array![1.3, 0.4];
        let grad = q.log_density_grad(&lambda, x.view())?;
        let h = 1e-6;
        for j in 0..2 {
            let mut up = x.clone();
            let mut dn = x.clone();
            up[j] += h;
            dn[j] -= h;
            let fd = (q.log_density(&lambda, up.view())? - q.log_density(&lambda, dn.view())?) / (2.0 * h);
            assert_abs_diff_eq!(grad[j], fd, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_sample_and_cov() -> Result<()> {
        let q = MFStudentT::new(2, 5.0)?;
        let mut rng = StdRng::seed_from_u64(7);
        let lambda = array![1.0, -1.0, 0.0, 0.0];
        let samples = q.sample(&lambda, 20, &mut rng)?;
        assert_eq!(samples.dim(), (20, 2));
        assert!(samples.iter().all(|x| x.is_finite()));

        let (mean, cov) = q.mean_and_cov(&lambda)?;
        assert_eq!(mean, array![1.0, -1.0]);
        assert_abs_diff_eq!(cov[[0, 0]], 5.0 / 3.0, epsilon = 1e-12);
        Ok(())
    }
}
