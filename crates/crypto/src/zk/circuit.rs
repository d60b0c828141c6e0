//! R1CS for the MiMC preimage relation.
//!
//! Public input `h`, private witness `x`, and the single statement
//! `MiMC(x) == h`. Each round costs three multiplication constraints
//! (`t²`, `t⁴`, `t⁵`); the final equality is one more.

use super::mimc::round_constants;
use ark_bn254::Fr;
use ark_ff::Field;
use ark_relations::lc;
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystemRef, LinearCombination, SynthesisError, Variable,
};

/// Circuit proving knowledge of `preimage` with `MiMC(preimage) = hash`.
///
/// Leave both fields `None` for key generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreimageCircuit {
    pub preimage: Option<Fr>,
    pub hash: Option<Fr>,
}

impl PreimageCircuit {
    /// Shape-only instance for circuit-specific setup.
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn new(preimage: Fr, hash: Fr) -> Self {
        Self {
            preimage: Some(preimage),
            hash: Some(hash),
        }
    }
}

fn assigned(value: Option<Fr>) -> Result<Fr, SynthesisError> {
    value.ok_or(SynthesisError::AssignmentMissing)
}

impl ConstraintSynthesizer<Fr> for PreimageCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let x_var = cs.new_witness_variable(|| assigned(self.preimage))?;
        let h_var = cs.new_input_variable(|| assigned(self.hash))?;

        let mut state: LinearCombination<Fr> = lc!() + x_var;
        let mut state_value = self.preimage;

        for c in round_constants() {
            let t = state.clone() + (*c, Variable::One);
            let t_value = state_value.map(|s| s + c);

            let t2_value = t_value.map(|t| t.square());
            let t2 = cs.new_witness_variable(|| assigned(t2_value))?;
            cs.enforce_constraint(t.clone(), t.clone(), lc!() + t2)?;

            let t4_value = t2_value.map(|t2| t2.square());
            let t4 = cs.new_witness_variable(|| assigned(t4_value))?;
            cs.enforce_constraint(lc!() + t2, lc!() + t2, lc!() + t4)?;

            let t5_value = t4_value.zip(t_value).map(|(t4, t)| t4 * t);
            let t5 = cs.new_witness_variable(|| assigned(t5_value))?;
            cs.enforce_constraint(lc!() + t4, t, lc!() + t5)?;

            state = lc!() + t5;
            state_value = t5_value;
        }

        // Miyaguchi–Preneel feed-forward, then bind to the public hash.
        cs.enforce_constraint(state + x_var, lc!() + Variable::One, lc!() + h_var)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zk::mimc::{mimc_hash, MIMC_ROUNDS};
    use ark_relations::r1cs::ConstraintSystem;

    #[test]
    fn test_satisfied_by_correct_preimage() {
        let x = Fr::from(42u64);
        let cs = ConstraintSystem::<Fr>::new_ref();
        PreimageCircuit::new(x, mimc_hash(x))
            .generate_constraints(cs.clone())
            .unwrap();

        assert!(cs.is_satisfied().unwrap());
        assert_eq!(cs.num_constraints(), 3 * MIMC_ROUNDS + 1);
        assert_eq!(cs.num_instance_variables(), 2);
    }

    #[test]
    fn test_unsatisfied_by_wrong_hash() {
        let x = Fr::from(42u64);
        let cs = ConstraintSystem::<Fr>::new_ref();
        PreimageCircuit::new(x, mimc_hash(Fr::from(41u64)))
            .generate_constraints(cs.clone())
            .unwrap();

        assert!(!cs.is_satisfied().unwrap());
    }
}
