//! Default prompt catalog.

/// Prompts seeded into an empty store.
pub const DEFAULT_PROMPTS: &[&str] = &[
    "Write a function that reverses a string without using built-in reverse methods.",
    "Implement a simple calculator that supports addition, subtraction, multiplication, and division.",
    "Create a function that checks if a given string is a palindrome.",
    "Write a program that prints the Fibonacci sequence up to n terms.",
    "Implement a function that finds the largest number in an array.",
];
