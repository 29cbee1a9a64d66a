fn main() {
    clickstream_gateway::app::startup::startup();
}
