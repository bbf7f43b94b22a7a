//! `armpilot probe` – find which observation layout a policy server accepts.
//!
//! Sends one observation per [`ObservationSchema`] and checks that the reply
//! carries at least `horizon` action rows of at least `action_dim` values.

use armpilot_hal::FrameSource;
use armpilot_policy::{CapturedFrames, ObservationBundle, ObservationSchema, PolicyClient};
use armpilot_types::{JointState, PilotError};
use colored::Colorize;
use tracing::debug;

/// Result of probing one schema.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub schema: ObservationSchema,
    pub result: Result<(usize, usize), PilotError>,
}

impl ProbeOutcome {
    pub fn compatible(&self) -> bool {
        self.result.is_ok()
    }
}

/// Probe every known schema against `client`.
pub fn probe_schemas<P: PolicyClient + ?Sized>(
    client: &mut P,
    frames: &mut dyn FrameSource,
    prompt: &str,
    horizon: usize,
    action_dim: usize,
) -> Vec<ProbeOutcome> {
    ObservationSchema::ALL
        .into_iter()
        .map(|schema| ProbeOutcome {
            schema,
            result: probe_one(client, frames, schema, prompt, horizon, action_dim),
        })
        .collect()
}

fn probe_one<P: PolicyClient + ?Sized>(
    client: &mut P,
    frames: &mut dyn FrameSource,
    schema: ObservationSchema,
    prompt: &str,
    horizon: usize,
    action_dim: usize,
) -> Result<(usize, usize), PilotError> {
    let mut captured = CapturedFrames::new();
    for &camera in schema.cameras() {
        captured.insert(camera, frames.capture(camera)?);
    }
    let observation = ObservationBundle::assemble(schema, JointState([0.5; 6]), captured, prompt)?;
    let response = client.infer(&observation)?;

    let rows = response.actions.len();
    let dim = response.actions.iter().map(Vec::len).min().unwrap_or(0);
    debug!(%schema, rows, dim, "probe reply");
    if rows < horizon || dim < action_dim {
        return Err(PilotError::Inference(format!(
            "actions shaped ({rows}, {dim}), need at least ({horizon}, {action_dim})"
        )));
    }
    Ok((rows, dim))
}

/// Print the compatibility table and a recommendation.
pub fn print_report(outcomes: &[ProbeOutcome]) {
    println!();
    println!("{}", "  Schema compatibility".bold());
    println!("  {}", "─".repeat(48).dimmed());
    for outcome in outcomes {
        match &outcome.result {
            Ok((rows, dim)) => println!(
                "  {:10} {}  actions ({rows}, {dim})",
                outcome.schema.to_string(),
                "✓ compatible".green()
            ),
            Err(e) => println!(
                "  {:10} {}  {}",
                outcome.schema.to_string(),
                "✗ incompatible".red(),
                e.to_string().dimmed()
            ),
        }
    }
    println!();
    match outcomes.iter().find(|o| o.compatible()) {
        Some(first) => println!(
            "  Recommended: add {} to your config.\n",
            format!("schema = \"{}\"", first.schema).bold()
        ),
        None => println!(
            "  {}\n",
            "No schema worked. Check the server's checkpoint and config.".yellow()
        ),
    }
}

#[cfg(test)]
mod tests {
    use armpilot_hal::SimRig;
    use armpilot_policy::{PolicyResponse, ServerMetadata};

    use super::*;

    /// Accepts only the LIBERO layout.
    struct LiberoOnly {
        metadata: ServerMetadata,
        seen: Vec<ObservationSchema>,
    }

    impl PolicyClient for LiberoOnly {
        fn infer(&mut self, obs: &ObservationBundle) -> Result<PolicyResponse, PilotError> {
            self.seen.push(obs.schema());
            match obs.schema() {
                ObservationSchema::Libero => Ok(PolicyResponse::new(vec![vec![0.0; 7]; 50])),
                ObservationSchema::Droid => Ok(PolicyResponse::new(vec![vec![0.0; 6]; 10])),
                other => Err(PilotError::Inference(format!("KeyError for {other}"))),
            }
        }

        fn metadata(&self) -> &ServerMetadata {
            &self.metadata
        }
    }

    #[test]
    fn reports_each_schema() {
        let mut client = LiberoOnly {
            metadata: ServerMetadata::new(),
            seen: Vec::new(),
        };
        let mut frames = SimRig::new(16, 16).build();

        let outcomes = probe_schemas(&mut client, &mut frames, "test task", 50, 6);

        assert_eq!(client.seen, ObservationSchema::ALL.to_vec());
        let compatible: Vec<ObservationSchema> = outcomes
            .iter()
            .filter(|o| o.compatible())
            .map(|o| o.schema)
            .collect();
        assert_eq!(compatible, vec![ObservationSchema::Libero]);
        assert!(matches!(outcomes[0].result, Err(PilotError::Inference(_))));
        // DROID answered, but with too few rows for the horizon.
        let droid = outcomes.iter().find(|o| o.schema == ObservationSchema::Droid).unwrap();
        assert!(droid.result.as_ref().unwrap_err().to_string().contains("(10, 6)"));
        print_report(&outcomes);
    }
}
