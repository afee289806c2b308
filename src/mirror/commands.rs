//! Requests against `/ip/firewall/address-list`.

use crate::routeros::sentence::{command_tag, Command, Sentence, FETCH_TAG, LISTEN_TAG};

const BASE: &str = "/ip/firewall/address-list";

/// Bulk snapshot of every entry.
pub fn getall() -> Sentence {
    Command::new(format!("{BASE}/getall"))
        .attr(".proplist", ".id,address,list")
        .tag(FETCH_TAG)
        .build()
}

/// Change stream. `.dead` marks removals.
pub fn listen() -> Sentence {
    Command::new(format!("{BASE}/listen"))
        .attr(".proplist", ".id,.dead,address,list")
        .tag(LISTEN_TAG)
        .build()
}

pub fn add(tag: u64, address: &str, list: &str, timeout: Option<&str>) -> Sentence {
    Command::new(format!("{BASE}/add"))
        .tag(&command_tag(tag))
        .attr("address", address)
        .attr("list", list)
        .attr_opt("timeout", timeout)
        .build()
}

pub fn set(tag: u64, id: &str, list: &str, timeout: Option<&str>) -> Sentence {
    Command::new(format!("{BASE}/set"))
        .tag(&command_tag(tag))
        .attr(".id", id)
        .attr("list", list)
        .attr_opt("timeout", timeout)
        .build()
}

pub fn remove(tag: u64, id: &str) -> Sentence {
    Command::new(format!("{BASE}/remove"))
        .tag(&command_tag(tag))
        .attr(".id", id)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getall_and_listen() {
        assert_eq!(
            getall().words(),
            ["/ip/firewall/address-list/getall", "=.proplist=.id,address,list", ".tag=FETCH"]
        );
        assert_eq!(
            listen().words(),
            ["/ip/firewall/address-list/listen", "=.proplist=.id,.dead,address,list", ".tag=LISTEN"]
        );
    }

    #[test]
    fn test_add_with_timeout() {
        assert_eq!(
            add(0x1F, "1.2.3.4", "a_test", Some("1d")).words(),
            ["/ip/firewall/address-list/add", ".tag=1F", "=address=1.2.3.4", "=list=a_test", "=timeout=1d"]
        );
    }

    #[test]
    fn test_set_and_remove() {
        assert_eq!(
            set(2, "*7", "b_test", None).words(),
            ["/ip/firewall/address-list/set", ".tag=2", "=.id=*7", "=list=b_test"]
        );
        assert_eq!(
            remove(10, "*7").words(),
            ["/ip/firewall/address-list/remove", ".tag=A", "=.id=*7"]
        );
    }
}
