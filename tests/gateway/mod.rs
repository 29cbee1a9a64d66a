mod dashboard_rpc;
mod ingestion;
mod lifecycle;
