use super::OutputFormat;
use anyhow::Result;
use cluster_state::ClusterIdentity;
use comfy_table::{Cell, Color, Table};
use k3sctl::App;

fn node_color(status: &str) -> Color {
    match status {
        "ready" | "running" => Color::Green,
        "terminated" | "stopped" => Color::Red,
        _ => Color::Yellow,
    }
}

pub async fn run(app: &App, id: &str, output: OutputFormat) -> Result<()> {
    let identity: ClusterIdentity = id.parse()?;
    let info = app.orchestrator.describe(&identity).await?;

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Cluster:  {}", info.id);
    println!("Status:   {}", info.status);
    println!("Version:  {}", info.version);

    let mut table = Table::new();
    table.set_header(vec!["Instance", "Role", "External IP", "Internal IP", "Status"]);
    for node in &info.nodes {
        table.add_row(vec![
            Cell::new(&node.instance_id),
            Cell::new(&node.role),
            Cell::new(node.external_ip.join(",")),
            Cell::new(node.internal_ip.join(",")),
            Cell::new(&node.status).fg(node_color(&node.status)),
        ]);
    }
    println!("{table}");
    Ok(())
}
