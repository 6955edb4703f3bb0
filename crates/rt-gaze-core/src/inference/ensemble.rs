//! Checkpoint ensembles.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use tracing::info;

use super::backbone::Backbone;
use super::gaze_net::GazeNet;
use crate::domain::{GazeAngles, GazeRegressor};

/// Averages the predictions of several regressors.
///
/// Every member gets the same weight; there is no outlier rejection.
pub struct GazeEnsemble {
    members: Vec<Box<dyn GazeRegressor>>,
}

impl GazeEnsemble {
    /// Wraps a non-empty member list.
    ///
    /// # Errors
    ///
    /// Returns an error if `members` is empty.
    pub fn new(members: Vec<Box<dyn GazeRegressor>>) -> Result<Self> {
        if members.is_empty() {
            anyhow::bail!("gaze ensemble needs at least one checkpoint");
        }
        Ok(Self { members })
    }

    /// Loads one [`GazeNet`] per checkpoint path.
    ///
    /// # Errors
    ///
    /// Returns an error if no paths are given or any checkpoint fails to load.
    pub fn load<P: AsRef<Path>>(paths: &[P], backbone: Backbone, device: &Device) -> Result<Self> {
        let members = paths
            .iter()
            .map(|p| {
                let p = p.as_ref();
                GazeNet::load(p, backbone, device)
                    .with_context(|| format!("Failed to load checkpoint {}", p.display()))
                    .map(|net| Box::new(net) as Box<dyn GazeRegressor>)
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Loaded {} {backbone} checkpoint(s)", members.len());
        Self::new(members)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; an ensemble has at least one member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names, in order.
    #[must_use]
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name().to_string()).collect()
    }
}

impl GazeRegressor for GazeEnsemble {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn members(&self) -> usize {
        self.members.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, left: &Tensor, right: &Tensor, head_pose: &Tensor) -> Result<GazeAngles> {
        let mut theta = 0.0;
        let mut phi = 0.0;
        for member in &self.members {
            let g = member.predict(left, right, head_pose)?;
            theta += g.theta;
            phi += g.phi;
        }
        let n = self.members.len() as f32;
        Ok(GazeAngles::new(theta / n, phi / n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    struct Fixed(GazeAngles);

    impl GazeRegressor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _: &Tensor, _: &Tensor, _: &Tensor) -> Result<GazeAngles> {
            Ok(self.0)
        }
    }

    fn dummy() -> Tensor {
        Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_mean_of_members() {
        let ensemble = GazeEnsemble::new(vec![
            Box::new(Fixed(GazeAngles::new(0.1, -0.3))),
            Box::new(Fixed(GazeAngles::new(0.3, 0.1))),
            Box::new(Fixed(GazeAngles::new(0.2, 0.5))),
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        let t = dummy();
        let g = ensemble.predict(&t, &t, &t).unwrap_or_else(|e| panic!("{e}"));
        assert!((g.theta - 0.2).abs() < 1e-6);
        assert!((g.phi - 0.1).abs() < 1e-6);
        assert_eq!(ensemble.len(), 3);
    }

    #[test]
    fn test_single_member_is_identity() {
        let ensemble = GazeEnsemble::new(vec![Box::new(Fixed(GazeAngles::new(0.4, -0.2)))])
            .unwrap_or_else(|e| panic!("{e}"));
        let t = dummy();
        let g = ensemble.predict(&t, &t, &t).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(g, GazeAngles::new(0.4, -0.2));
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        assert!(GazeEnsemble::new(Vec::new()).is_err());
        let none: [&str; 0] = [];
        assert!(GazeEnsemble::load(&none, Backbone::Vgg, &Device::Cpu).is_err());
    }
}
