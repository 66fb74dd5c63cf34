// snaptest: run the snapshot verification workload against an in-process cluster.
//
// Each test id runs as its own workload phase in order, sharing one cluster,
// the same way a restarting test drives phases 0..3 across a snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use snap_cluster::{LocalCluster, RunConfig, SnapTestCase, SnapTestWorkload};
use snap_core::OpUid;
use snap_storage::restart_info::load_restore_uid;
use snap_storage::KeyValueStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "snaptest", about = "Cluster hot-snapshot verification workload")]
struct Args {
    /// TOML run file with [cluster] and [workload] tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for worker data folders
    #[arg(long, default_value = "snapdata")]
    data_dir: PathBuf,

    /// Number of workers in the local cluster
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Test ids to run in order; overrides the config's test_id
    #[arg(long, value_delimiter = ',')]
    test_ids: Vec<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let run = match &args.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    let test_ids = if args.test_ids.is_empty() {
        vec![run.workload.test_id]
    } else {
        args.test_ids.clone()
    };

    let cluster = LocalCluster::build(&args.data_dir, args.workers, &run.cluster)
        .context("building local cluster")?;

    for test_id in test_ids {
        let mut config = run.workload.clone();
        config.test_id = test_id;

        let db: Arc<dyn KeyValueStore> = if SnapTestCase::try_from(test_id)? == SnapTestCase::VerifyKeys {
            let uid: OpUid = load_restore_uid(&config.restart_info_location)?
                .context("restart info has no snapshot uid")?;
            Arc::new(cluster.restored_db(uid)?)
        } else {
            cluster.db.clone()
        };

        let mut workload = SnapTestWorkload::new(config, cluster.client.clone(), db, cluster.markers.clone())
            .with_tlog_reply_timeout(run.cluster.tlog_reply_timeout());
        workload
            .start()
            .await
            .with_context(|| format!("snap test {test_id} failed"))?;
        if !workload.check().await {
            bail!("snap test {test_id} check failed");
        }
        info!(test_id, "snap test passed");
    }
    Ok(())
}
