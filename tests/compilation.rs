// Compilation tests to prevent regressions in core types and trait seams

#[cfg(test)]
mod compilation_tests {
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_seams_are_object_safe() {
        use tfdrift::attribution::AuditLogSource;
        use tfdrift::issues::IssueTracker;
        use tfdrift::notify::ChatChannel;
        use tfdrift::shared::clock::Clock;
        use tfdrift::terraform::TerraformCli;

        // Each pipeline stage is wired through a trait object
        let _ = std::any::type_name::<Arc<dyn AuditLogSource>>();
        let _ = std::any::type_name::<Arc<dyn IssueTracker>>();
        let _ = std::any::type_name::<Arc<dyn ChatChannel>>();
        let _ = std::any::type_name::<Arc<dyn Clock>>();
        let _ = std::any::type_name::<Box<dyn TerraformCli>>();
    }

    #[test]
    fn test_channel_limits() {
        use tfdrift::notify::teams::{TEAMS_DEFAULT_DISPLAY_LIMIT, TEAMS_MAX_MESSAGE_LENGTH};
        use tfdrift::notify::telegram::TELEGRAM_MAX_MESSAGE_LENGTH;
        use tfdrift::notify::{ChatChannel, TeamsChannel, TelegramChannel};

        assert_eq!(TELEGRAM_MAX_MESSAGE_LENGTH, 4096);
        assert_eq!(TEAMS_MAX_MESSAGE_LENGTH, 20_000);

        let telegram = TelegramChannel::new("123456789:AAEexampleBotTokenValue", "@alerts");
        assert_eq!(telegram.name(), "telegram");
        assert_eq!(telegram.max_message_length(), TELEGRAM_MAX_MESSAGE_LENGTH);
        assert_eq!(telegram.display_limit(), None);

        let teams = TeamsChannel::new("https://example.webhook.office.com/webhookb2/abc");
        assert_eq!(teams.name(), "teams");
        assert_eq!(teams.display_limit(), Some(TEAMS_DEFAULT_DISPLAY_LIMIT));
    }

    #[test]
    fn test_default_retry_policy() {
        use tfdrift::shared::retry::RetryPolicy;

        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn test_run_outcome_exit_codes() {
        use tfdrift::RunOutcome;

        let clean = RunOutcome::Clean {
            notifications: vec![],
        };
        assert_eq!(clean.exit_code(), 0);
        assert!(!clean.is_drift());
    }

    #[test]
    fn test_config_defaults() {
        use tfdrift::Config;

        let config = Config::default();
        assert!(config.attribution.enabled);
        assert_eq!(config.attribution.lookback_days, 7);
        assert_eq!(config.attribution.query_interval_ms, 500);
        assert_eq!(config.notify.part_interval_ms, 100);
        assert!(!config.notify.notify_on_clean);
        assert!(!config.telegram_enabled());
        assert!(!config.teams_enabled());
        assert!(!config.github_enabled());
    }
}
