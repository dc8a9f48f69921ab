//! Astrometric noise for the solver trials.
//!
//! Trial 0 of a triplet is always the nominal one; the other trials carry a seed from
//! [`noise_seed`](super::triplets_selection::noise_seed). A solver that perturbs its own
//! inputs draws the offsets here, so that a seed always gives the same perturbed triplet.
use nalgebra::Vector2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::Normal;

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{ArcSec, ARCSEC_PER_DEG},
    conversion::apply_offset,
    orbit_fit::Triplet,
};

/// Perturb the positions of a triplet with isotropic Gaussian noise.
///
/// Arguments
/// ---------
/// * `triplet`: the nominal observations
/// * `seed`: `None` for the nominal trial (returned unchanged)
/// * `sigma`: standard deviation of each tangent-plane component (arcsec)
///
/// Return
/// ------
/// * the perturbed copy; epochs, magnitudes and ids are untouched.
/// * `Err(NoiseInjectionError)` for a negative or non-finite `sigma`.
pub fn perturb_triplet(
    triplet: &Triplet,
    seed: Option<u64>,
    sigma: ArcSec,
) -> Result<Triplet, AsterlinkError> {
    let Some(seed) = seed else {
        return Ok(triplet.clone());
    };
    let normal = Normal::new(0.0, sigma / ARCSEC_PER_DEG)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut perturbed = triplet.clone();
    for obs in perturbed.iter_mut() {
        let offset = Vector2::new(rng.sample(normal), rng.sample(normal));
        let (ra, dec) = apply_offset(obs.ra, obs.dec, &offset);
        obs.ra = ra;
        obs.dec = dec;
    }
    Ok(perturbed)
}

#[cfg(test)]
mod noise_test {
    use super::*;
    use crate::observations::Observation;

    fn triplet() -> Triplet {
        [
            Observation::new(1, 10.0, 5.0, 2459000.6, 18.0, 1, 1),
            Observation::new(2, 10.5, 5.2, 2459001.6, 18.0, 1, 2),
            Observation::new(3, 11.0, 5.4, 2459002.6, 18.0, 1, 3),
        ]
    }

    #[test]
    fn test_nominal_trial_is_untouched() {
        let t = triplet();
        assert_eq!(perturb_triplet(&t, None, 0.5).unwrap(), t);
    }

    #[test]
    fn test_perturbation_is_reproducible_and_small() {
        let t = triplet();
        let a = perturb_triplet(&t, Some(42), 0.5).unwrap();
        let b = perturb_triplet(&t, Some(42), 0.5).unwrap();
        let c = perturb_triplet(&t, Some(43), 0.5).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        for (nominal, noisy) in t.iter().zip(a.iter()) {
            assert!(nominal.separation(noisy) < 10.0 / ARCSEC_PER_DEG);
            assert_eq!(nominal.jd, noisy.jd);
        }
    }

    #[test]
    fn test_invalid_sigma() {
        assert!(matches!(
            perturb_triplet(&triplet(), Some(1), f64::NAN),
            Err(AsterlinkError::NoiseInjectionError(_))
        ));
    }
}
