use super::OutputFormat;
use anyhow::Result;
use cluster_state::{ClusterInfo, Status};
use comfy_table::{Cell, Color, Table};
use k3sctl::App;

pub fn status_color(status: Status) -> Color {
    match status {
        Status::Running => Color::Green,
        Status::Failed => Color::Red,
        Status::Creating | Status::Join | Status::Upgrading => Color::Yellow,
    }
}

pub fn cluster_table(clusters: &[ClusterInfo]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Name", "Region", "Provider", "Status", "Masters", "Workers", "Version",
    ]);
    for cluster in clusters {
        table.add_row(vec![
            Cell::new(&cluster.name),
            Cell::new(&cluster.region),
            Cell::new(&cluster.provider),
            Cell::new(cluster.status).fg(status_color(cluster.status)),
            Cell::new(cluster.master),
            Cell::new(cluster.worker),
            Cell::new(&cluster.version),
        ]);
    }
    table
}

pub async fn run(app: &App, output: OutputFormat) -> Result<()> {
    let clusters = app.orchestrator.list().await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
        OutputFormat::Table if clusters.is_empty() => println!("No clusters"),
        OutputFormat::Table => println!("{}", cluster_table(&clusters)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_state::{ClusterDescriptor, ClusterState};

    #[test]
    fn test_table_rows() {
        let mut d = ClusterDescriptor::new("dev", "demo");
        d.apply_defaults();
        let state = ClusterState::new(d, Status::Running);
        let table = cluster_table(&[ClusterInfo::from(&state)]).to_string();

        assert!(table.contains("Provider"));
        assert!(table.contains("dev"));
        assert!(table.contains("running"));
        assert!(table.contains("stable"));
    }
}
