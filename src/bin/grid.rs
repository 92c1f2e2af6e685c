// Kiln grid launcher
// Submits one scheduler job per (partition x gpu-count x model) combination.
// A separate, simpler tool than the trainer: it shares no state with the
// training loop and talks only to sbatch.

use anyhow::{bail, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser, Debug)]
#[command(name = "kiln-grid")]
#[command(about = "Submit a grid of fine-tuning jobs to a SLURM cluster", version)]
struct Args {
    /// Script each job runs (receives the model path as its argument)
    #[arg(long, default_value = "scripts/launch_run.sh")]
    script: String,

    /// Model weight paths to sweep
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "/model-weights/opt-350m,/model-weights/Llama-2-7b-hf"
    )]
    models: Vec<String>,

    /// Partitions to sweep
    #[arg(long, value_delimiter = ',', default_value = "t4v2,a40,a100")]
    partitions: Vec<String>,

    /// GPU counts to sweep (one job per count)
    #[arg(long, value_delimiter = ',', default_value = "1,2,4,8")]
    gpus: Vec<u32>,

    /// Wall-clock limit per job
    #[arg(long, default_value = "00:30:00")]
    time: String,

    /// Quality-of-service flag, passed through when set
    #[arg(long)]
    qos: Option<String>,

    /// Actually submit via sbatch instead of printing the commands
    #[arg(long)]
    submit: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let timestamp = chrono::Utc::now().timestamp();
    let jobs = expand_grid(&args, timestamp);

    for job in &jobs {
        println!("{}", job.join(" "));
    }

    if args.submit {
        for job in &jobs {
            let status = Command::new(&job[0]).args(&job[1..]).status()?;
            if !status.success() {
                bail!("sbatch exited with {}", status);
            }
        }
        eprintln!("Submitted {} job(s)", jobs.len());
    } else {
        eprintln!(
            "{} job(s); pass --submit to send them to the scheduler",
            jobs.len()
        );
    }
    Ok(())
}

fn expand_grid(args: &Args, timestamp: i64) -> Vec<Vec<String>> {
    let mut jobs = Vec::new();
    let mut index = 0;
    for partition in &args.partitions {
        for &gpus in &args.gpus {
            for model in &args.models {
                let mut cmd: Vec<String> = vec![
                    "sbatch".into(),
                    "--nodes".into(),
                    "1".into(),
                    "--mem".into(),
                    "0".into(),
                    "--ntasks-per-node".into(),
                    "1".into(),
                    "--cpus-per-gpu".into(),
                    "6".into(),
                    "--gres".into(),
                    format!("gpu:{}", gpus),
                    "--partition".into(),
                    partition.clone(),
                    "--time".into(),
                    args.time.clone(),
                    "--output".into(),
                    format!("data/output/{}.{}.out", timestamp, index),
                    "--error".into(),
                    format!("data/output/{}.{}.out", timestamp, index),
                    "--job-name".into(),
                    format!("kiln-{}-{}", timestamp, index),
                ];
                if let Some(qos) = &args.qos {
                    cmd.push("--qos".into());
                    cmd.push(qos.clone());
                }
                cmd.push(args.script.clone());
                cmd.push(model.clone());
                jobs.push(cmd);
                index += 1;
            }
        }
    }
    jobs
}
