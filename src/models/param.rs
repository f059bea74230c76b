//! Named trainable parameter buffers

use ndarray::Array1;

/// A named parameter: flat data buffer, logical shape, optional gradient.
///
/// Segmentors expose their weights as a slice of `Param` so that optimizers,
/// the precision strategy and gradient synchronization can treat all models
/// uniformly. Gradients are accumulated (not overwritten) so the distillation
/// term and the supervised term can both contribute to one step.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    shape: Vec<usize>,
    data: Array1<f32>,
    grad: Option<Array1<f32>>,
    requires_grad: bool,
}

impl Param {
    /// Create a parameter from flat data and a logical shape
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of `shape`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Array1<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Param data length must match shape product"
        );
        Self {
            name: name.into(),
            shape,
            data,
            grad: None,
            requires_grad: true,
        }
    }

    /// Parameter name, unique within a segmentor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat data view
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    /// Mutable flat data view
    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    /// Current gradient, if any has been accumulated
    pub fn grad(&self) -> Option<&Array1<f32>> {
        self.grad.as_ref()
    }

    /// Mutable gradient access
    pub fn grad_mut(&mut self) -> Option<&mut Array1<f32>> {
        self.grad.as_mut()
    }

    /// Accumulate a gradient contribution
    ///
    /// No-op for frozen parameters.
    pub fn accumulate_grad(&mut self, contribution: &Array1<f32>) {
        if !self.requires_grad {
            return;
        }
        match &mut self.grad {
            Some(g) => *g += contribution,
            None => self.grad = Some(contribution.clone()),
        }
    }

    /// Clear the gradient
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// Whether this parameter receives gradients
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Freeze or unfreeze the parameter
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
        if !requires_grad {
            self.grad = None;
        }
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_param_accumulates_gradients() {
        let mut p = Param::new("w", vec![2, 2], arr1(&[1.0, 2.0, 3.0, 4.0]));
        p.accumulate_grad(&arr1(&[0.5, 0.5, 0.5, 0.5]));
        p.accumulate_grad(&arr1(&[0.5, 0.5, 0.5, 0.5]));
        assert_eq!(p.grad().unwrap()[0], 1.0);

        p.zero_grad();
        assert!(p.grad().is_none());
    }

    #[test]
    fn test_frozen_param_ignores_gradients() {
        let mut p = Param::new("b", vec![3], arr1(&[0.0, 0.0, 0.0]));
        p.set_requires_grad(false);
        p.accumulate_grad(&arr1(&[1.0, 1.0, 1.0]));
        assert!(p.grad().is_none());
        assert!(!p.requires_grad());
    }

    #[test]
    #[should_panic(expected = "shape product")]
    fn test_shape_mismatch_panics() {
        Param::new("w", vec![2, 3], arr1(&[1.0, 2.0]));
    }
}
