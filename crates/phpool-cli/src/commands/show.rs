use super::{colorize_status, core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(config: &ServiceConfig, username: &str, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let pool = manager.get_pool(username).map_err(|e| core_err(&e))?;
    if json {
        println!("{}", json_pretty(&pool)?);
        return Ok(EXIT_SUCCESS);
    }
    let s = &pool.settings;
    println!("user:            {}", pool.username);
    println!("group:           {}", pool.group);
    println!("php_version:     {}", pool.php_version);
    println!("provider:        {}", pool.provider);
    println!("status:          {}", colorize_status(pool.status));
    println!("config:          {}", pool.config_path.display());
    println!("socket:          {}", pool.socket_path.display());
    println!("pm:              {}", s.process_manager);
    println!("max_children:    {}", s.max_children);
    println!("start_servers:   {}", s.start_servers);
    println!(
        "spare_servers:   {}-{}",
        s.min_spare_servers, s.max_spare_servers
    );
    println!("max_requests:    {}", s.max_requests);
    println!("memory_limit:    {}", s.memory_limit);
    println!("created_at:      {}", pool.created_at);
    println!("updated_at:      {}", pool.updated_at);
    Ok(EXIT_SUCCESS)
}
